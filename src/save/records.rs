//! Save records and per-section save bookkeeping.

use super::queue::SectionPayload;
use crate::section::SectionNumber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Origin of records carrying source content.
pub const SOURCE_ORIGIN: &str = "source";

/// Origin of records typed by the user.
pub const USER_ORIGIN: &str = "user";

/// One record of the `cxsave` content array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRecord {
    pub content: String,
    /// Source section number, shared by the source and target records
    pub section_id: SectionNumber,
    pub validate: bool,
    pub origin: String,
}

/// Record origin of content produced by a provider.
///
/// Content started from the source text or from scratch counts as typed by
/// the user; anything else is attributed to the MT provider.
pub fn origin_for_provider(provider: Option<&str>) -> &str {
    match provider {
        None | Some("source") | Some("scratch") | Some("") => USER_ORIGIN,
        Some(provider) => provider,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSaveState {
    /// Records built for this section during the session
    pub count: u32,
    /// The last validation reported problems
    pub error: bool,
    /// The source record was part of a successful save
    pub source_saved: bool,
}

/// Session-wide save bookkeeping per section.
#[derive(Debug, Clone)]
pub struct SaveTracker {
    sections: HashMap<SectionNumber, SectionSaveState>,
    validate_every: u32,
}

impl SaveTracker {
    pub fn new(validate_every: u32) -> Self {
        Self {
            sections: HashMap::new(),
            validate_every: validate_every.max(1),
        }
    }

    pub fn state(&self, section_number: SectionNumber) -> SectionSaveState {
        self.sections
            .get(&section_number)
            .copied()
            .unwrap_or_default()
    }

    /// Build the records of one queued section.
    ///
    /// The target record is validated when the last validation failed, on
    /// every `validate_every`-th build, or when it carries MT content. The
    /// source record is attached until one save including it succeeds.
    pub fn build_records(&mut self, payload: &SectionPayload) -> Vec<SectionRecord> {
        let validate_every = self.validate_every;
        let state = self.sections.entry(payload.section_number).or_default();

        let origin = origin_for_provider(payload.translation.mt_provider.as_deref());
        let validate =
            state.error || state.count % validate_every == 0 || origin != USER_ORIGIN;

        let mut records = vec![SectionRecord {
            content: payload.translation.content.clone(),
            section_id: payload.section_number,
            validate,
            origin: origin.to_string(),
        }];

        if !state.source_saved {
            records.push(SectionRecord {
                content: payload.source.content.clone(),
                section_id: payload.section_number,
                validate: false,
                origin: SOURCE_ORIGIN.to_string(),
            });
        }

        state.count += 1;
        records
    }

    pub fn mark_source_saved(&mut self, section_number: SectionNumber) {
        self.sections
            .entry(section_number)
            .or_default()
            .source_saved = true;
    }

    pub fn set_error(&mut self, section_number: SectionNumber, error: bool) {
        self.sections.entry(section_number).or_default().error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(provider: Option<&str>) -> SectionPayload {
        SectionPayload::new(4, "<p>Hola</p>", provider, "<p>Hello</p>")
    }

    #[test]
    fn test_origin_for_provider() {
        assert_eq!(origin_for_provider(None), "user");
        assert_eq!(origin_for_provider(Some("source")), "user");
        assert_eq!(origin_for_provider(Some("scratch")), "user");
        assert_eq!(origin_for_provider(Some("Google")), "Google");
    }

    #[test]
    fn test_first_build_includes_source_record() {
        let mut tracker = SaveTracker::new(5);
        let records = tracker.build_records(&payload(Some("source")));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].origin, "user");
        assert_eq!(records[0].section_id, 4);
        assert!(records[0].validate, "count 0 is a multiple of 5");
        assert_eq!(records[1].origin, SOURCE_ORIGIN);
        assert_eq!(records[1].content, "<p>Hello</p>");
        assert!(!records[1].validate);
    }

    #[test]
    fn test_source_record_attached_until_marked_saved() {
        let mut tracker = SaveTracker::new(5);
        tracker.build_records(&payload(None));
        assert_eq!(tracker.build_records(&payload(None)).len(), 2);

        tracker.mark_source_saved(4);
        assert_eq!(tracker.build_records(&payload(None)).len(), 1);
    }

    #[test]
    fn test_user_content_validated_every_fifth_build() {
        let mut tracker = SaveTracker::new(5);
        let flags: Vec<bool> = (0..11)
            .map(|_| tracker.build_records(&payload(Some("scratch")))[0].validate)
            .collect();
        assert_eq!(
            flags,
            vec![true, false, false, false, false, true, false, false, false, false, true]
        );
        assert_eq!(tracker.state(4).count, 11);
    }

    #[test]
    fn test_mt_content_always_validated() {
        let mut tracker = SaveTracker::new(5);
        for _ in 0..4 {
            assert!(tracker.build_records(&payload(Some("Google")))[0].validate);
        }
    }

    #[test]
    fn test_error_forces_validation() {
        let mut tracker = SaveTracker::new(5);
        tracker.build_records(&payload(None));
        tracker.set_error(4, true);
        assert!(tracker.build_records(&payload(None))[0].validate);

        tracker.set_error(4, false);
        assert!(!tracker.build_records(&payload(None))[0].validate);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = SectionRecord {
            content: "x".to_string(),
            section_id: 2,
            validate: true,
            origin: "user".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sectionId"], 2);
        assert_eq!(json["validate"], true);
    }
}
