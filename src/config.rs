//! Session configuration from the environment.
//!
//! Only `CX_API_URL` is required; every tunable falls back to its default
//! when unset or unparsable.

use crate::retry::Backoff;
use crate::save::SaveSettings;
use crate::tracker::TrackerSettings;
use anyhow::{Context, Result};
use std::time::Duration;

const DEFAULT_WIKIDATA_API_URL: &str = "https://www.wikidata.org/w/api.php";

#[derive(Debug, Clone)]
pub struct Config {
    // MediaWiki
    pub api_url: String,
    pub wikidata_api_url: String,
    pub wiki_id: String,
    pub csrf_token: Option<String>,

    // Tracker
    pub mt_abuse_threshold: f64,
    pub change_debounce_ms: u64,

    // Saving
    pub save_throttle_secs: u64,
    pub save_retry_step_secs: u64,
    pub save_backoff: String,
    pub save_max_failures: u32,
    pub validate_every: u32,
}

impl Config {
    /// Configuration with default tunables for the given action API.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            wikidata_api_url: DEFAULT_WIKIDATA_API_URL.to_string(),
            wiki_id: "enwiki".to_string(),
            csrf_token: None,
            mt_abuse_threshold: 0.75,
            change_debounce_ms: 500,
            save_throttle_secs: 15,
            save_retry_step_secs: 60,
            save_backoff: "linear".to_string(),
            save_max_failures: 5,
            validate_every: 5,
        }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::new(String::new());

        Ok(Self {
            // MediaWiki
            api_url: std::env::var("CX_API_URL").context("CX_API_URL not set")?,
            wikidata_api_url: std::env::var("CX_WIKIDATA_API_URL")
                .unwrap_or_else(|_| DEFAULT_WIKIDATA_API_URL.to_string()),
            wiki_id: std::env::var("CX_WIKI_ID").unwrap_or(defaults.wiki_id),
            csrf_token: std::env::var("CX_CSRF_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),

            // Tracker
            mt_abuse_threshold: std::env::var("CX_MT_ABUSE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mt_abuse_threshold),
            change_debounce_ms: std::env::var("CX_CHANGE_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.change_debounce_ms),

            // Saving
            save_throttle_secs: std::env::var("CX_SAVE_THROTTLE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.save_throttle_secs),
            save_retry_step_secs: std::env::var("CX_SAVE_RETRY_STEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.save_retry_step_secs),
            save_backoff: std::env::var("CX_SAVE_BACKOFF")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.save_backoff),
            save_max_failures: std::env::var("CX_SAVE_MAX_FAILURES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.save_max_failures),
            validate_every: std::env::var("CX_VALIDATE_EVERY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|every: &u32| *every > 0)
                .unwrap_or(defaults.validate_every),
        })
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            unmodified_mt_threshold: self.mt_abuse_threshold,
            change_debounce: Duration::from_millis(self.change_debounce_ms),
            ..TrackerSettings::default()
        }
    }

    /// Save retry schedule. `exponential` doubles the step after each
    /// failure up to ten steps; anything else is linear.
    pub fn save_backoff(&self) -> Backoff {
        let step = Duration::from_secs(self.save_retry_step_secs);
        match self.save_backoff.as_str() {
            "exponential" => Backoff::exponential(step, step.saturating_mul(10)),
            _ => Backoff::linear(step),
        }
    }

    pub fn save_settings(&self) -> SaveSettings {
        SaveSettings {
            throttle: Duration::from_secs(self.save_throttle_secs),
            backoff: self.save_backoff(),
            max_failures: self.save_max_failures,
            validate_every: self.validate_every.max(1),
        }
    }
}
