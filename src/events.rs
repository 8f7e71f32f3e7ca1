//! Session event bus.
//!
//! Annotations and save status are published as typed events on a
//! `tokio::sync::broadcast` channel. Any number of observers (UI layer,
//! logging, tests) subscribe; publishing never blocks and succeeds with no
//! subscribers.

use crate::section::SectionNumber;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Help page linked from abuse-filter annotations.
pub const ABUSE_FILTER_HELP_URL: &str =
    "https://www.mediawiki.org/wiki/Special:MyLanguage/Content_translation/Abuse_filter";

/// Severity of a section annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// An annotation attached to a target section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LintResult {
    /// Message body (HTML provided by the server, or a message key)
    pub message: String,
    /// Title message key
    pub title: String,
    pub severity: Severity,
    pub help: String,
}

/// Unmodified machine translation above the abuse threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MtAbuseWarning {
    pub section_number: SectionNumber,
    /// Unmodified share rounded to a whole percentage
    pub percentage: u32,
    pub threshold: f64,
    pub message_key: &'static str,
    pub title_key: &'static str,
}

/// Everything observers can learn about a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    MtAbuseWarning(MtAbuseWarning),
    #[serde(rename_all = "camelCase")]
    MtAbuseCleared { section_number: SectionNumber },
    #[serde(rename_all = "camelCase")]
    ValidationIssues {
        section_number: SectionNumber,
        results: Vec<LintResult>,
    },
    #[serde(rename_all = "camelCase")]
    ValidationCleared { section_number: SectionNumber },
    Saving,
    Saved {
        at: DateTime<Utc>,
        sections: Vec<SectionNumber>,
    },
    #[serde(rename_all = "camelCase")]
    SaveFailed {
        failures: u32,
        code: String,
        retry_in: Option<Duration>,
    },
    /// Saving failed repeatedly and automatic retries stopped.
    SaveHardError,
    /// The server no longer recognizes the user session.
    LostSession,
    #[serde(rename_all = "camelCase")]
    Published { target_title: String, target_url: String },
    #[serde(rename_all = "camelCase")]
    PublishFailed { status: String, text: String },
}

/// Broadcast channel for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, ignoring the case of no subscribers.
    pub fn emit(&self, event: SessionEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!("Session event delivered to {} subscribers", count),
            Err(_) => debug!("Session event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!("Event subscriber lagged, {} events skipped", skipped);
            }
            Err(_) => break,
        }
    }
    events
}
