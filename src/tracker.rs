//! Translation progress tracking and unmodified-MT abuse detection.
//!
//! The tracker keeps one [`SectionState`] per source section. Change
//! notifications from the editing surface arrive as element ids, are
//! collected into a pending set and processed after a quiet period. Each
//! processed section gets fresh progress and unmodified percentages and is
//! checked against the abuse threshold.

use crate::events::{EventBus, MtAbuseWarning, SessionEvent};
use crate::i18n::Language;
use crate::scheduling::Debounce;
use crate::html::plain_text;
use crate::section::{SectionIdTable, SectionNumber, SectionState};
use crate::surface::{TargetSectionSnapshot, TargetSurface};
use crate::tokens::{progress_ratio, token_count, unmodified_ratio};
use crate::translation::Translation;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

pub const MT_ABUSE_WARNING_KEY: &str = "cx-mt-abuse-warning-text";
pub const MT_ABUSE_TITLE_KEY: &str = "cx-mt-abuse-warning-title";

/// Tunables of the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Tolerated share of unmodified MT in a section
    pub unmodified_mt_threshold: f64,
    /// Sections with fewer source tokens are never flagged
    pub min_source_tokens: usize,
    pub change_debounce: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            unmodified_mt_threshold: 0.75,
            min_source_tokens: 10,
            change_debounce: Duration::from_millis(500),
        }
    }
}

/// Progress summary of the whole translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationProgress {
    /// Share of sections with any translation
    pub any: f64,
    /// Share of sections with human modified content
    pub human: f64,
    /// Share of sections with unmodified MT content
    pub mt: f64,
    pub mt_sections_count: usize,
}

/// A section the tracker looked at, with the surface content it saw.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedChange {
    pub section_number: SectionNumber,
    pub snapshot: TargetSectionSnapshot,
}

pub struct TranslationTracker {
    settings: TrackerSettings,
    source_language: Language,
    target_language: Language,
    sections: BTreeMap<SectionNumber, SectionState>,
    ids: SectionIdTable,
    change_queue: Vec<SectionNumber>,
    change_debounce: Debounce,
    validation_queue: Vec<SectionNumber>,
    flagged: BTreeSet<SectionNumber>,
    surface: Arc<dyn TargetSurface>,
    events: EventBus,
}

impl TranslationTracker {
    /// Create the section states of a translation, seeding them from the
    /// persisted units of a resumed draft.
    pub fn new(
        translation: &Translation,
        surface: Arc<dyn TargetSurface>,
        events: EventBus,
        settings: TrackerSettings,
    ) -> Self {
        let mut sections = BTreeMap::new();
        let mut ids = SectionIdTable::new();

        for source in &translation.sections {
            let number = source.section_number;
            let mut state = SectionState::new(number, source.text());

            if let Some(unit) = translation.saved_unit(number) {
                if let Some(user) = &unit.user {
                    state.set_user_translation_content(Some(plain_text(&user.content)));
                    state.set_current_mt_provider(user.engine.clone());
                }
                if let Some(mt) = &unit.mt {
                    state.set_unmodified_mt_content(Some(plain_text(&mt.content)));
                    state.set_current_mt_provider(mt.engine.clone());
                }
            }

            ids.register_section(number);
            sections.insert(number, state);
        }

        info!(
            "Translation tracker initialized for {} sections",
            sections.len()
        );

        Self {
            change_debounce: Debounce::new(settings.change_debounce),
            settings,
            source_language: translation.source_language.clone(),
            target_language: translation.target_language.clone(),
            sections,
            ids,
            change_queue: Vec::new(),
            validation_queue: Vec::new(),
            flagged: BTreeSet::new(),
            surface,
            events,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn section_state(&self, section_number: SectionNumber) -> Option<&SectionState> {
        self.sections.get(&section_number)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn ids(&self) -> &SectionIdTable {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut SectionIdTable {
        &mut self.ids
    }

    /// Sections currently carrying an MT abuse warning.
    pub fn flagged_sections(&self) -> Vec<SectionNumber> {
        self.flagged.iter().copied().collect()
    }

    pub fn pending_changes(&self) -> &[SectionNumber] {
        &self.change_queue
    }

    /// Record a change notification for a section element id.
    ///
    /// Returns false when the id does not resolve to a tracked section.
    pub fn add_to_change_queue(&mut self, section_id: &str, now: Instant) -> bool {
        match self.ids.resolve(section_id) {
            Some(number) if self.sections.contains_key(&number) => {
                self.add_section_to_change_queue(number, now);
                true
            }
            _ => {
                debug!("Ignoring change for unknown section id {}", section_id);
                false
            }
        }
    }

    pub fn add_section_to_change_queue(&mut self, section_number: SectionNumber, now: Instant) {
        if !self.change_queue.contains(&section_number) {
            self.change_queue.push(section_number);
        }
        self.change_debounce.trigger(now);
    }

    /// When the pending change set is due for processing.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.change_debounce.deadline()
    }

    /// Process the pending changes if the quiet period has elapsed.
    pub fn on_timer(&mut self, now: Instant) -> Vec<ProcessedChange> {
        if self.change_debounce.poll(now) {
            self.process_change_queue()
        } else {
            Vec::new()
        }
    }

    /// Process every pending change right away.
    pub fn process_change_queue(&mut self) -> Vec<ProcessedChange> {
        self.change_debounce.cancel();
        let queue = std::mem::take(&mut self.change_queue);
        queue
            .into_iter()
            .filter_map(|number| self.process_section_change(number))
            .collect()
    }

    /// Bring one section's state up to date with the surface.
    ///
    /// Returns `None` when the surface cannot currently provide the section.
    pub fn process_section_change(
        &mut self,
        section_number: SectionNumber,
    ) -> Option<ProcessedChange> {
        let snapshot = self.surface.target_section(section_number)?;
        let state = self.sections.get_mut(&section_number)?;
        let new_content = snapshot.text();
        let new_provider = snapshot.mt_provider.clone();

        let mut fresh_translation = false;
        if state.current_mt_provider() != new_provider.as_deref() {
            info!(
                "MT provider of section {} changed to {:?}",
                section_number, new_provider
            );
            state.set_current_mt_provider(new_provider.clone());
            state.set_user_translation_content(None);
            state.set_unmodified_mt_content(None);
            fresh_translation = true;
        }

        if !state.has_baseline() {
            state.set_current_mt_provider(new_provider.clone());
            state.set_unmodified_mt_content(Some(new_content.clone()));
            debug!(
                "Fresh translation for section {} with {:?}",
                section_number, new_provider
            );
        }

        let processed = ProcessedChange {
            section_number,
            snapshot,
        };

        if state.user_translation_content() == Some(new_content.as_str()) {
            // Markup-only change
            return Some(processed);
        }
        state.set_user_translation_content(Some(new_content));

        self.update_section_progress(section_number);

        if fresh_translation {
            // Validated with the next change of any section
            if !self.validation_queue.contains(&section_number) {
                self.validation_queue.push(section_number);
            }
            return Some(processed);
        }

        self.validation_queue.retain(|number| *number != section_number);
        self.apply_mt_abuse_validation(section_number);
        self.process_validation_queue();

        Some(processed)
    }

    /// Recompute the progress and unmodified percentages of a section.
    pub fn update_section_progress(&mut self, section_number: SectionNumber) {
        let target_language = self.target_language.code();
        let Some(state) = self.sections.get_mut(&section_number) else {
            return;
        };

        let baseline = state.unmodified_mt_content().unwrap_or_default();
        let current = state.user_translation_content().unwrap_or_default();
        let unmodified = unmodified_ratio(baseline, current, target_language);
        let progress = progress_ratio(state.source_content(), current, target_language);

        state.set_unmodified_percentage(unmodified);
        state.set_translation_progress_percentage(progress);
    }

    /// Whether a section crosses the unmodified MT threshold.
    pub fn validate_for_mt_abuse(&self, section_number: SectionNumber) -> bool {
        let Some(state) = self.sections.get(&section_number) else {
            return false;
        };

        let source_tokens = token_count(state.source_content(), self.source_language.code());
        if source_tokens < self.settings.min_source_tokens {
            return false;
        }

        state.unmodified_percentage() > self.settings.unmodified_mt_threshold
    }

    fn apply_mt_abuse_validation(&mut self, section_number: SectionNumber) {
        if self.validate_for_mt_abuse(section_number) {
            let unmodified = self
                .sections
                .get(&section_number)
                .map(SectionState::unmodified_percentage)
                .unwrap_or_default();
            let percentage = (unmodified * 100.0).round() as u32;
            info!(
                "Unmodified MT in section {} is {}%, above the threshold of {}%",
                section_number,
                percentage,
                self.settings.unmodified_mt_threshold * 100.0
            );
            self.flagged.insert(section_number);
            self.events
                .emit(SessionEvent::MtAbuseWarning(MtAbuseWarning {
                    section_number,
                    percentage,
                    threshold: self.settings.unmodified_mt_threshold,
                    message_key: MT_ABUSE_WARNING_KEY,
                    title_key: MT_ABUSE_TITLE_KEY,
                }));
        } else if self.flagged.remove(&section_number) {
            self.events
                .emit(SessionEvent::MtAbuseCleared { section_number });
        }
    }

    /// Validate every section whose validation was deferred.
    pub fn process_validation_queue(&mut self) {
        let queue = std::mem::take(&mut self.validation_queue);
        for section_number in queue {
            self.apply_mt_abuse_validation(section_number);
        }
    }

    /// Progress summary across all sections.
    ///
    /// Pending changes are processed first, so the summary never lags behind
    /// the surface. A translation without sections reports zero everywhere.
    pub fn translation_progress(&mut self) -> TranslationProgress {
        self.process_change_queue();

        let numbers: Vec<SectionNumber> = self.sections.keys().copied().collect();
        for number in &numbers {
            self.update_section_progress(*number);
        }

        let total = self.sections.len();
        if total == 0 {
            return TranslationProgress::default();
        }

        let mut any = 0;
        let mut human = 0;
        let mut mt = 0;
        for state in self.sections.values() {
            if state.has_baseline() || state.has_user_content() {
                any += 1;
            }
            if state.is_unmodified_mt() {
                mt += 1;
            } else if state.is_human_modified() {
                human += 1;
            }
        }

        let total = total as f64;
        TranslationProgress {
            any: any as f64 / total,
            human: human as f64 / total,
            mt: mt as f64 / total,
            mt_sections_count: mt,
        }
    }
}
