//! Save controller.
//!
//! Owns the save queue and decides when to flush it. The controller never
//! performs I/O: [`SaveController::flush`] hands back a prepared request,
//! the session runs it and reports the outcome with
//! [`SaveController::on_save_success`] or [`SaveController::on_save_failure`].
//! At most one request is outstanding; preparing a new one supersedes it.

use super::metrics::SaveMetrics;
use super::queue::{SaveQueue, SectionPayload};
use super::records::{SaveTracker, SOURCE_ORIGIN};
use crate::api::{ApiError, SaveRequest, SaveResponse, Validation};
use crate::events::{EventBus, LintResult, SessionEvent, Severity, ABUSE_FILTER_HELP_URL};
use crate::payload::encode_records;
use crate::retry::Backoff;
use crate::scheduling::{Throttle, ThrottleDecision};
use crate::section::SectionNumber;
use crate::tracker::TranslationProgress;
use crate::translation::Translation;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Message key returned when the page is left with unsaved sections.
pub const UNSAVED_WARNING_KEY: &str = "cx-warning-unsaved-translation";

/// Title key of abuse-filter annotations.
pub const ABUSE_FILTER_TITLE_KEY: &str = "cx-tools-linter-abuse-filter";

#[derive(Debug, Clone, PartialEq)]
pub struct SaveSettings {
    /// Minimum spacing of scheduled saves
    pub throttle: Duration,
    pub backoff: Backoff,
    /// Consecutive failures tolerated before automatic retries stop
    pub max_failures: u32,
    /// User content is validated on every n-th save of a section
    pub validate_every: u32,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(15),
            backoff: Backoff::default(),
            max_failures: 5,
            validate_every: 5,
        }
    }
}

/// What asked for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Throttled save after edits
    Scheduled,
    /// Automatic retry after a failure
    Retry,
    /// Explicit save (keyboard shortcut, leaving the page); waits for a
    /// scheduled retry like a throttled save
    Forced,
    /// Save before publishing; replaces a scheduled retry
    Publish,
}

/// A save request ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSave {
    pub request_id: u64,
    pub request: SaveRequest,
    /// Request this one replaces; its task must be aborted
    pub supersedes: Option<u64>,
    pub sections: Vec<SectionNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushDecision {
    /// Nothing to save
    Idle,
    /// A retry is scheduled; everything but the retry and publishing waits
    /// for it
    Skipped,
    Dispatch(PreparedSave),
}

/// A completed save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    pub request_id: u64,
    pub sections: Vec<SectionNumber>,
    pub at: DateTime<Utc>,
    pub translation_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error("Save request was superseded")]
    Aborted,

    #[error("Save failed ({code}): {message}")]
    Failed {
        code: String,
        message: String,
        recoverable: bool,
    },

    #[error("Failed to build save request: {0}")]
    Build(String),

    #[error("Translation session is closed")]
    SessionClosed,
}

impl SaveError {
    /// Whether saving again later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SaveError::Aborted => true,
            SaveError::Failed { recoverable, .. } => *recoverable,
            SaveError::Build(_) | SaveError::SessionClosed => false,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    request_id: u64,
    revisions: Vec<(SectionNumber, u64)>,
    source_sections: Vec<SectionNumber>,
    categories_sent: u32,
    source_categories_sent: bool,
    title: String,
}

pub struct SaveController {
    settings: SaveSettings,
    queue: SaveQueue,
    tracker: SaveTracker,
    throttle: Throttle,
    retry_at: Option<Instant>,
    failures: u32,
    in_flight: Option<InFlight>,
    next_request_id: u64,
    saved_target_title: String,
    target_categories_changed: u32,
    source_categories_saved: bool,
    last_saved_at: Option<DateTime<Utc>>,
    events: EventBus,
    metrics: Arc<SaveMetrics>,
}

impl SaveController {
    pub fn new(translation: &Translation, settings: SaveSettings, events: EventBus) -> Self {
        Self {
            queue: SaveQueue::new(),
            tracker: SaveTracker::new(settings.validate_every),
            throttle: Throttle::new(settings.throttle),
            settings,
            retry_at: None,
            failures: 0,
            in_flight: None,
            next_request_id: 0,
            saved_target_title: translation.target_title.clone(),
            target_categories_changed: 0,
            source_categories_saved: false,
            last_saved_at: None,
            events,
            metrics: Arc::new(SaveMetrics::new()),
        }
    }

    pub fn settings(&self) -> &SaveSettings {
        &self.settings
    }

    pub fn queue(&self) -> &SaveQueue {
        &self.queue
    }

    pub fn metrics(&self) -> Arc<SaveMetrics> {
        self.metrics.clone()
    }

    /// Consecutive failures of the current episode.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn in_flight_request(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|in_flight| in_flight.request_id)
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn target_categories_changed(&self) -> u32 {
        self.target_categories_changed
    }

    pub fn is_title_dirty(&self, translation: &Translation) -> bool {
        self.saved_target_title != translation.target_title
    }

    /// Whether anything is waiting to be saved.
    pub fn has_changes(&self, translation: &Translation) -> bool {
        !self.queue.is_empty()
            || self.is_title_dirty(translation)
            || self.target_categories_changed > 0
    }

    /// Queue a section and schedule a save. Returns true when the save
    /// should run right away.
    pub fn queue_section(&mut self, payload: SectionPayload, now: Instant) -> bool {
        debug!("Queued section {} for saving", payload.section_number);
        self.queue.upsert(payload);
        self.schedule(now)
    }

    /// Record a target category change. Returns true when the save should
    /// run right away.
    pub fn on_target_categories_changed(&mut self, now: Instant) -> bool {
        self.target_categories_changed += 1;
        self.schedule(now)
    }

    /// Schedule a throttled save. Returns true when it should run right away.
    pub fn schedule(&mut self, now: Instant) -> bool {
        match self.throttle.call(now) {
            ThrottleDecision::RunNow => true,
            ThrottleDecision::Deferred(at) => {
                debug!("Save deferred by {:?}", at.saturating_duration_since(now));
                false
            }
        }
    }

    /// Earliest instant at which [`SaveController::on_timer`] has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.throttle.deadline(), self.retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Flushes that are due at `now`.
    pub fn on_timer(&mut self, now: Instant) -> Vec<FlushTrigger> {
        let mut triggers = Vec::new();
        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            triggers.push(FlushTrigger::Retry);
        }
        if self.throttle.poll(now) {
            triggers.push(FlushTrigger::Scheduled);
        }
        triggers
    }

    /// Warning to show when the page is left with unsaved sections.
    pub fn on_unload(&self) -> Option<&'static str> {
        if self.queue.is_empty() {
            None
        } else {
            Some(UNSAVED_WARNING_KEY)
        }
    }

    /// Prepare a save of everything pending.
    pub fn flush(
        &mut self,
        trigger: FlushTrigger,
        translation: &Translation,
        progress: TranslationProgress,
    ) -> Result<FlushDecision, SaveError> {
        if !self.has_changes(translation) {
            debug!("Nothing to save");
            return Ok(FlushDecision::Idle);
        }

        match trigger {
            FlushTrigger::Scheduled | FlushTrigger::Forced if self.failures > 0 => {
                info!("Save skipped because a retry has been scheduled");
                return Ok(FlushDecision::Skipped);
            }
            FlushTrigger::Publish if self.retry_at.take().is_some() => {
                info!("Saving before publishing replaces the scheduled retry");
            }
            _ => {}
        }

        let mut records = Vec::new();
        let mut revisions = Vec::new();
        let mut source_sections = Vec::new();
        for (payload, revision) in self.queue.snapshot() {
            let section_records = self.tracker.build_records(&payload);
            if section_records
                .iter()
                .any(|record| record.origin == SOURCE_ORIGIN)
            {
                debug!("Saving source content of section {}", payload.section_number);
                source_sections.push(payload.section_number);
            }
            records.extend(section_records);
            revisions.push((payload.section_number, revision));
        }

        let content = encode_records(&records).map_err(|e| SaveError::Build(format!("{:#}", e)))?;

        let (target_categories, source_categories, categories_sent) =
            if self.target_categories_changed > 0 {
                let source = (!self.source_categories_saved)
                    .then(|| translation.source_categories.clone());
                (
                    Some(translation.target_categories.clone()),
                    source,
                    self.target_categories_changed,
                )
            } else {
                (None, None, 0)
            };

        let request = SaveRequest {
            source_language: translation.source_language.code().to_string(),
            target_language: translation.target_language.code().to_string(),
            source_title: translation.source_title.clone(),
            target_title: translation.target_title.clone(),
            source_revision_id: translation.source_revision_id,
            content,
            progress,
            target_categories,
            source_categories,
        };

        let supersedes = self.in_flight.take().map(|previous| {
            info!("Aborting active save request {}", previous.request_id);
            self.metrics.record_aborted();
            previous.request_id
        });

        if self.failures > 0 {
            info!(
                "Retrying to save the translation, {} failures so far",
                self.failures
            );
        }

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let sections: Vec<SectionNumber> = revisions.iter().map(|(number, _)| *number).collect();

        self.in_flight = Some(InFlight {
            request_id,
            revisions,
            source_sections,
            categories_sent,
            source_categories_sent: request.source_categories.is_some(),
            title: request.target_title.clone(),
        });
        self.metrics.record_request();
        self.events.emit(SessionEvent::Saving);

        Ok(FlushDecision::Dispatch(PreparedSave {
            request_id,
            request,
            supersedes,
            sections,
        }))
    }

    /// Take the in-flight record if it belongs to `request_id`.
    fn take_in_flight(&mut self, request_id: u64) -> Option<InFlight> {
        if self.in_flight_request() != Some(request_id) {
            debug!("Ignoring outcome of superseded save request {}", request_id);
            return None;
        }
        self.in_flight.take()
    }

    /// Apply a successful save. Returns `None` for superseded requests.
    pub fn on_save_success(
        &mut self,
        request_id: u64,
        response: &SaveResponse,
    ) -> Option<SaveReceipt> {
        let in_flight = self.take_in_flight(request_id)?;

        if self.target_categories_changed > 0 && in_flight.categories_sent > 0 {
            info!("Target categories saved");
        }
        if self.saved_target_title != in_flight.title {
            info!("Target title saved");
        }
        self.saved_target_title = in_flight.title;
        if in_flight.source_categories_sent {
            self.source_categories_saved = true;
        }
        self.target_categories_changed = self
            .target_categories_changed
            .saturating_sub(in_flight.categories_sent);

        for section_number in &in_flight.source_sections {
            self.tracker.mark_source_saved(*section_number);
        }

        let mut sections = Vec::with_capacity(in_flight.revisions.len());
        for (section_number, revision) in &in_flight.revisions {
            if let Some(findings) = response.validations_for(*section_number) {
                self.apply_validation(*section_number, findings);
            }
            if !self.queue.remove_if_revision(*section_number, *revision) {
                debug!(
                    "Section {} changed while saving, keeping it queued",
                    section_number
                );
            }
            sections.push(*section_number);
        }

        if self.failures > 0 {
            info!("Retry successful, save succeeded");
        }
        self.failures = 0;
        self.retry_at = None;

        let at = Utc::now();
        self.last_saved_at = Some(at);
        self.metrics.record_success();
        info!("Saved {} sections", sections.len());
        self.events.emit(SessionEvent::Saved {
            at,
            sections: sections.clone(),
        });

        Some(SaveReceipt {
            request_id,
            sections,
            at,
            translation_id: response.translation_id,
        })
    }

    /// Apply a failed save. Returns `None` for superseded requests.
    pub fn on_save_failure(
        &mut self,
        request_id: u64,
        failure: &ApiError,
        now: Instant,
    ) -> Option<SaveError> {
        self.take_in_flight(request_id)?;

        self.failures += 1;
        self.metrics.record_failure();
        let code = failure.code();
        warn!("Saving failed. Error code: {} ({})", code, failure);

        if failure.is_lost_session() {
            self.events.emit(SessionEvent::LostSession);
        }

        if self.failures > self.settings.max_failures {
            error!("Saving failed repeatedly. Stopping retries.");
            self.events.emit(SessionEvent::SaveFailed {
                failures: self.failures,
                code: code.clone(),
                retry_in: None,
            });
            self.events.emit(SessionEvent::SaveHardError);
            // Any later change can start a new episode
            self.failures = 0;
            self.retry_at = None;
        } else {
            let delay = self.settings.backoff.delay_for_failure(self.failures);
            self.retry_at = Some(now + delay);
            self.metrics.record_retry_scheduled();
            info!("Save retry scheduled in {:?}", delay);
            self.events.emit(SessionEvent::SaveFailed {
                failures: self.failures,
                code: code.clone(),
                retry_in: Some(delay),
            });
        }

        Some(SaveError::Failed {
            code,
            message: failure.to_string(),
            recoverable: failure.is_recoverable(),
        })
    }

    fn apply_validation(&mut self, section_number: SectionNumber, findings: &[Validation]) {
        if findings.is_empty() {
            if self.tracker.state(section_number).error {
                self.tracker.set_error(section_number, false);
                self.events
                    .emit(SessionEvent::ValidationCleared { section_number });
            }
            return;
        }

        self.tracker.set_error(section_number, true);
        let results: Vec<LintResult> = findings
            .iter()
            .filter_map(|finding| {
                let message = finding.warn.as_ref()?.message_html.clone()?;
                Some(LintResult {
                    message,
                    title: ABUSE_FILTER_TITLE_KEY.to_string(),
                    severity: if finding.disallow {
                        Severity::Error
                    } else {
                        Severity::Warning
                    },
                    help: ABUSE_FILTER_HELP_URL.to_string(),
                })
            })
            .collect();

        warn!(
            "Section {} has {} abuse filter findings",
            section_number,
            results.len()
        );
        self.events.emit(SessionEvent::ValidationIssues {
            section_number,
            results,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::i18n::Language;
    use crate::payload::decode_records;
    use crate::save::records::SectionRecord;
    use serde_json::json;

    // ==================== Helper Functions ====================

    fn translation() -> Translation {
        let mut translation = Translation::new(
            Language::from_code("en").unwrap(),
            Language::from_code("es").unwrap(),
            "Moon",
            "Luna",
            42,
        );
        translation.source_categories = vec!["Category:Moons".to_string()];
        translation.target_categories = vec!["Categoría:Lunas".to_string()];
        translation
    }

    fn controller(events: &EventBus) -> SaveController {
        SaveController::new(&translation(), SaveSettings::default(), events.clone())
    }

    fn payload(section_number: SectionNumber, content: &str) -> SectionPayload {
        SectionPayload::new(section_number, content, Some("Google"), "<p>Source</p>")
    }

    fn dispatch(
        controller: &mut SaveController,
        trigger: FlushTrigger,
        translation: &Translation,
    ) -> PreparedSave {
        match controller
            .flush(trigger, translation, TranslationProgress::default())
            .unwrap()
        {
            FlushDecision::Dispatch(prepared) => prepared,
            other => panic!("Expected a dispatch, got {:?}", other),
        }
    }

    fn records(prepared: &PreparedSave) -> Vec<SectionRecord> {
        decode_records(&prepared.request.content).unwrap()
    }

    fn server_error() -> ApiError {
        ApiError::Status {
            status: 503,
            body: String::new(),
        }
    }

    // ==================== Queue and Throttle Tests ====================

    #[test]
    fn test_first_queue_runs_now_and_later_ones_are_deferred() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let t0 = Instant::now();

        assert!(controller.queue_section(payload(1, "a"), t0));
        assert!(!controller.queue_section(payload(2, "b"), t0 + Duration::from_secs(1)));
        assert!(!controller.queue_section(payload(3, "c"), t0 + Duration::from_secs(14)));
        assert_eq!(controller.next_deadline(), Some(t0 + Duration::from_secs(15)));

        assert!(controller.on_timer(t0 + Duration::from_secs(14)).is_empty());
        assert_eq!(
            controller.on_timer(t0 + Duration::from_secs(15)),
            vec![FlushTrigger::Scheduled]
        );
        assert_eq!(controller.next_deadline(), None);
    }

    #[test]
    fn test_flush_without_changes_is_idle() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let decision = controller
            .flush(
                FlushTrigger::Forced,
                &translation(),
                TranslationProgress::default(),
            )
            .unwrap();
        assert_eq!(decision, FlushDecision::Idle);
    }

    #[test]
    fn test_double_queue_sends_one_record_with_latest_content() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let now = Instant::now();
        controller.queue_section(payload(1, "<p>first</p>"), now);
        controller.queue_section(payload(1, "<p>second</p>"), now);

        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation());
        let targets: Vec<SectionRecord> = records(&prepared)
            .into_iter()
            .filter(|record| record.origin != SOURCE_ORIGIN)
            .collect();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].content, "<p>second</p>");
        assert_eq!(targets[0].origin, "Google");
        assert!(targets[0].validate);
    }

    #[test]
    fn test_request_carries_translation_fields() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        controller.queue_section(payload(1, "a"), Instant::now());

        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation());
        assert_eq!(prepared.request.source_language, "en");
        assert_eq!(prepared.request.target_language, "es");
        assert_eq!(prepared.request.source_title, "Moon");
        assert_eq!(prepared.request.target_title, "Luna");
        assert_eq!(prepared.request.source_revision_id, 42);
        assert_eq!(prepared.request.target_categories, None);
        assert_eq!(prepared.sections, vec![1]);
        assert_eq!(prepared.supersedes, None);
    }

    // ==================== Success Tests ====================

    #[test]
    fn test_source_record_sent_until_a_save_succeeds() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let first = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        assert_eq!(records(&first).len(), 2);
        controller.on_save_failure(first.request_id, &server_error(), now);

        // The failed save did not store the source, so the retry sends it again
        let retry = dispatch(&mut controller, FlushTrigger::Retry, &translation);
        assert_eq!(records(&retry).len(), 2);
        controller.on_save_success(retry.request_id, &SaveResponse::default());

        controller.queue_section(payload(1, "b"), now);
        let later = dispatch(&mut controller, FlushTrigger::Forced, &translation);
        let later_records = records(&later);
        assert_eq!(later_records.len(), 1);
        assert_ne!(later_records[0].origin, SOURCE_ORIGIN);
    }

    #[test]
    fn test_success_keeps_sections_changed_while_saving() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        controller.queue_section(payload(2, "b"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);

        controller.queue_section(payload(2, "b edited"), now);
        let receipt = controller
            .on_save_success(prepared.request_id, &SaveResponse::default())
            .unwrap();

        assert_eq!(receipt.sections, vec![1, 2]);
        assert_eq!(controller.queue().section_numbers(), vec![2]);
        assert_eq!(
            controller.queue().get(2).unwrap().translation.content,
            "b edited"
        );
    }

    #[test]
    fn test_success_emits_saving_and_saved() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let mut controller = controller(&events);
        controller.queue_section(payload(3, "a"), Instant::now());

        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation());
        let receipt = controller
            .on_save_success(prepared.request_id, &SaveResponse::default())
            .unwrap();

        let seen = drain(&mut rx);
        assert_eq!(seen[0], SessionEvent::Saving);
        assert_eq!(
            seen[1],
            SessionEvent::Saved {
                at: receipt.at,
                sections: vec![3]
            }
        );
        assert_eq!(controller.last_saved_at(), Some(receipt.at));
        assert_eq!(controller.metrics().successes(), 1);
    }

    // ==================== Single Flight Tests ====================

    #[test]
    fn test_new_flush_supersedes_in_flight_request() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let first = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        controller.queue_section(payload(1, "b"), now);
        let second = dispatch(&mut controller, FlushTrigger::Forced, &translation);

        assert_eq!(second.supersedes, Some(first.request_id));
        assert_eq!(controller.metrics().aborted(), 1);

        // The superseded request's outcome is ignored and not counted
        assert!(controller
            .on_save_failure(first.request_id, &server_error(), now)
            .is_none());
        assert_eq!(controller.failures(), 0);
        assert!(controller
            .on_save_success(first.request_id, &SaveResponse::default())
            .is_none());
        assert_eq!(controller.in_flight_request(), Some(second.request_id));
    }

    // ==================== Failure and Retry Tests ====================

    #[test]
    fn test_failure_schedules_linear_retry() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        let err = controller
            .on_save_failure(prepared.request_id, &server_error(), now)
            .unwrap();

        assert_eq!(
            err,
            SaveError::Failed {
                code: "http-503".to_string(),
                message: "HTTP 503: ".to_string(),
                recoverable: true,
            }
        );
        assert_eq!(controller.failures(), 1);
        assert_eq!(controller.retry_at(), Some(now + Duration::from_secs(60)));
        assert!(drain(&mut rx).contains(&SessionEvent::SaveFailed {
            failures: 1,
            code: "http-503".to_string(),
            retry_in: Some(Duration::from_secs(60)),
        }));
    }

    #[test]
    fn test_client_error_is_not_recoverable() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation());
        let err = controller
            .on_save_failure(
                prepared.request_id,
                &ApiError::Api {
                    code: "invalidtitle".to_string(),
                    info: "Bad title".to_string(),
                },
                now,
            )
            .unwrap();

        assert!(!err.is_recoverable());
        assert!(SaveError::Aborted.is_recoverable());
    }

    #[test]
    fn test_scheduled_flush_during_retry_is_noop() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        controller.on_save_failure(prepared.request_id, &server_error(), now);

        controller.queue_section(payload(2, "b"), now);
        let decision = controller
            .flush(
                FlushTrigger::Scheduled,
                &translation,
                TranslationProgress::default(),
            )
            .unwrap();
        assert_eq!(decision, FlushDecision::Skipped);
        assert_eq!(controller.metrics().requests(), 1);

        let retry_at = controller.retry_at().unwrap();
        assert_eq!(controller.on_timer(retry_at), vec![FlushTrigger::Retry]);
        let retry = dispatch(&mut controller, FlushTrigger::Retry, &translation);
        assert_eq!(retry.sections, vec![1, 2]);
    }

    #[test]
    fn test_forced_flush_waits_for_scheduled_retry() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        controller.on_save_failure(prepared.request_id, &server_error(), now);
        let retry_at = controller.retry_at().unwrap();

        let decision = controller
            .flush(
                FlushTrigger::Forced,
                &translation,
                TranslationProgress::default(),
            )
            .unwrap();
        assert_eq!(decision, FlushDecision::Skipped);
        assert_eq!(controller.metrics().requests(), 1);
        assert_eq!(controller.retry_at(), Some(retry_at));
    }

    #[test]
    fn test_publish_flush_replaces_scheduled_retry() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        controller.on_save_failure(prepared.request_id, &server_error(), now);
        assert!(controller.retry_at().is_some());

        let publish = dispatch(&mut controller, FlushTrigger::Publish, &translation);
        assert_eq!(controller.retry_at(), None);

        controller.on_save_success(publish.request_id, &SaveResponse::default());
        assert_eq!(controller.failures(), 0);
        assert!(controller.queue().is_empty());
    }

    #[test]
    fn test_six_failures_stop_retries_and_reset() {
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "a"), now);
        let mut trigger = FlushTrigger::Scheduled;
        for attempt in 1..=6 {
            let prepared = dispatch(&mut controller, trigger, &translation);
            controller.on_save_failure(prepared.request_id, &server_error(), now);
            if attempt < 6 {
                assert_eq!(controller.failures(), attempt);
                assert_eq!(
                    controller.retry_at(),
                    Some(now + Duration::from_secs(60 * attempt as u64))
                );
            }
            trigger = FlushTrigger::Retry;
        }

        assert_eq!(controller.failures(), 0);
        assert_eq!(controller.retry_at(), None);
        assert!(drain(&mut rx).contains(&SessionEvent::SaveHardError));
        assert_eq!(controller.metrics().retries_scheduled(), 5);

        // A fresh change may start a new episode
        assert!(matches!(
            controller
                .flush(
                    FlushTrigger::Scheduled,
                    &translation,
                    TranslationProgress::default()
                )
                .unwrap(),
            FlushDecision::Dispatch(_)
        ));
    }

    #[test]
    fn test_lost_session_emits_event() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let mut controller = controller(&events);
        controller.queue_section(payload(1, "a"), Instant::now());

        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation());
        let lost = ApiError::Api {
            code: "assertuserfailed".to_string(),
            info: "Not logged in".to_string(),
        };
        controller.on_save_failure(prepared.request_id, &lost, Instant::now());

        assert!(drain(&mut rx).contains(&SessionEvent::LostSession));
    }

    // ==================== Title and Category Tests ====================

    #[test]
    fn test_title_change_alone_triggers_save() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let mut translation = translation();
        translation.set_target_title("La Luna");

        assert!(controller.is_title_dirty(&translation));
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        assert_eq!(prepared.request.target_title, "La Luna");
        assert!(records(&prepared).is_empty());

        controller.on_save_success(prepared.request_id, &SaveResponse::default());
        assert!(!controller.is_title_dirty(&translation));
    }

    #[test]
    fn test_category_counter_subtracts_sent_changes() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.on_target_categories_changed(now);
        let first = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        assert_eq!(
            first.request.target_categories,
            Some(vec!["Categoría:Lunas".to_string()])
        );
        assert_eq!(
            first.request.source_categories,
            Some(vec!["Category:Moons".to_string()])
        );

        // Another change arrives while the first one is in flight
        controller.on_target_categories_changed(now);
        controller.on_save_success(first.request_id, &SaveResponse::default());
        assert_eq!(controller.target_categories_changed(), 1);

        let second = dispatch(&mut controller, FlushTrigger::Forced, &translation);
        assert!(second.request.target_categories.is_some());
        assert_eq!(second.request.source_categories, None);
        controller.on_save_success(second.request_id, &SaveResponse::default());
        assert_eq!(controller.target_categories_changed(), 0);
        assert!(!controller.has_changes(&translation));
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_validation_findings_annotate_and_clear() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let mut controller = controller(&events);
        let translation = translation();
        let now = Instant::now();

        controller.queue_section(payload(1, "spam"), now);
        let prepared = dispatch(&mut controller, FlushTrigger::Scheduled, &translation);
        let response: SaveResponse = serde_json::from_value(json!({
            "validations": {
                "1": [
                    {"warn": {"messageHtml": "<b>Blocked</b>"}, "disallow": true},
                    {"warn": {"messageHtml": "Looks odd"}}
                ]
            }
        }))
        .unwrap();
        controller.on_save_success(prepared.request_id, &response);

        let issues = drain(&mut rx)
            .into_iter()
            .find_map(|event| match event {
                SessionEvent::ValidationIssues {
                    section_number,
                    results,
                } => Some((section_number, results)),
                _ => None,
            })
            .unwrap();
        assert_eq!(issues.0, 1);
        assert_eq!(issues.1.len(), 2);
        assert_eq!(issues.1[0].severity, Severity::Error);
        assert_eq!(issues.1[0].title, ABUSE_FILTER_TITLE_KEY);
        assert_eq!(issues.1[0].help, ABUSE_FILTER_HELP_URL);
        assert_eq!(issues.1[1].severity, Severity::Warning);

        // The next save of the section is validated and comes back clean
        controller.queue_section(payload(1, "fixed"), now);
        let next = dispatch(&mut controller, FlushTrigger::Forced, &translation);
        assert!(records(&next)[0].validate);
        let clean: SaveResponse =
            serde_json::from_value(json!({"validations": {"1": []}})).unwrap();
        controller.on_save_success(next.request_id, &clean);

        assert!(drain(&mut rx).contains(&SessionEvent::ValidationCleared { section_number: 1 }));
    }

    // ==================== Unload Tests ====================

    #[test]
    fn test_unload_warning_only_with_queued_sections() {
        let events = EventBus::new(16);
        let mut controller = controller(&events);
        assert_eq!(controller.on_unload(), None);

        controller.queue_section(payload(1, "a"), Instant::now());
        assert_eq!(controller.on_unload(), Some(UNSAVED_WARNING_KEY));
    }
}
