//! Per-section translation state and section identity.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Stable identity of a source section within a session.
pub type SectionNumber = u32;

/// Prefix of target section element ids.
pub const TARGET_SECTION_PREFIX: &str = "cxTargetSection";

/// Prefix of source section element ids.
pub const SOURCE_SECTION_PREFIX: &str = "cxSourceSection";

/// Translation state of one section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionState {
    section_number: SectionNumber,
    source_content: String,
    unmodified_mt_content: Option<String>,
    user_translation_content: Option<String>,
    current_mt_provider: Option<String>,
    unmodified_percentage: f64,
    translation_progress_percentage: f64,
}

impl SectionState {
    pub fn new(section_number: SectionNumber, source_content: impl Into<String>) -> Self {
        Self {
            section_number,
            source_content: source_content.into(),
            unmodified_mt_content: None,
            user_translation_content: None,
            current_mt_provider: None,
            unmodified_percentage: 0.0,
            translation_progress_percentage: 0.0,
        }
    }

    pub fn section_number(&self) -> SectionNumber {
        self.section_number
    }

    pub fn source_content(&self) -> &str {
        &self.source_content
    }

    pub fn unmodified_mt_content(&self) -> Option<&str> {
        self.unmodified_mt_content.as_deref()
    }

    pub fn user_translation_content(&self) -> Option<&str> {
        self.user_translation_content.as_deref()
    }

    pub fn current_mt_provider(&self) -> Option<&str> {
        self.current_mt_provider.as_deref()
    }

    pub fn unmodified_percentage(&self) -> f64 {
        self.unmodified_percentage
    }

    pub fn translation_progress_percentage(&self) -> f64 {
        self.translation_progress_percentage
    }

    /// Whether a non-empty baseline MT content is recorded.
    pub fn has_baseline(&self) -> bool {
        self.unmodified_mt_content
            .as_deref()
            .is_some_and(|content| !content.is_empty())
    }

    /// Whether the editing surface holds non-empty content for this section.
    pub fn has_user_content(&self) -> bool {
        self.user_translation_content
            .as_deref()
            .is_some_and(|content| !content.is_empty())
    }

    /// User content present and identical to the baseline MT content.
    pub fn is_unmodified_mt(&self) -> bool {
        self.has_user_content() && self.user_translation_content == self.unmodified_mt_content
    }

    /// User content present and different from the baseline MT content.
    pub fn is_human_modified(&self) -> bool {
        self.has_user_content() && self.user_translation_content != self.unmodified_mt_content
    }

    pub fn set_unmodified_mt_content(&mut self, content: Option<String>) {
        self.unmodified_mt_content = content;
    }

    pub fn set_user_translation_content(&mut self, content: Option<String>) {
        self.user_translation_content = content;
    }

    pub fn set_current_mt_provider(&mut self, provider: Option<String>) {
        self.current_mt_provider = provider;
    }

    pub fn set_unmodified_percentage(&mut self, percentage: f64) {
        self.unmodified_percentage = percentage;
    }

    pub fn set_translation_progress_percentage(&mut self, percentage: f64) {
        self.translation_progress_percentage = percentage;
    }
}

static DIGITS_REGEX: OnceLock<Regex> = OnceLock::new();

/// Extract the section number embedded in an element id.
///
/// `"cxTargetSection12"` → `Some(12)`. Ids without digits yield `None`.
pub fn section_number_from_id(id: &str) -> Option<SectionNumber> {
    let digits = DIGITS_REGEX.get_or_init(|| Regex::new(r"\D").expect("static digits regex"));
    let number = digits.replace_all(id, "");
    if number.is_empty() {
        return None;
    }
    number.parse().ok()
}

pub fn target_section_id(section_number: SectionNumber) -> String {
    format!("{}{}", TARGET_SECTION_PREFIX, section_number)
}

pub fn source_section_id(section_number: SectionNumber) -> String {
    format!("{}{}", SOURCE_SECTION_PREFIX, section_number)
}

/// Lookup table from element ids to stable section numbers.
///
/// Editing surfaces rebuild section nodes (reference resolution, MT provider
/// switches, republication of a draft) and may hand out new ids for the same
/// section. Ids registered here keep resolving to the section number they
/// were bound to; ids never seen fall back to the number embedded in them.
#[derive(Debug, Default, Clone)]
pub struct SectionIdTable {
    ids: HashMap<String, SectionNumber>,
}

impl SectionIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the canonical source and target ids of a section.
    pub fn register_section(&mut self, section_number: SectionNumber) {
        self.ids
            .insert(source_section_id(section_number), section_number);
        self.ids
            .insert(target_section_id(section_number), section_number);
    }

    /// Bind an arbitrary id to a section number.
    pub fn bind(&mut self, id: impl Into<String>, section_number: SectionNumber) {
        self.ids.insert(id.into(), section_number);
    }

    /// Move a binding from an old id to a new one.
    ///
    /// Returns the section number now bound to `new_id`, or `None` when
    /// `old_id` does not resolve to any section.
    pub fn rebind(&mut self, old_id: &str, new_id: impl Into<String>) -> Option<SectionNumber> {
        let section_number = self.resolve(old_id)?;
        self.ids.remove(old_id);
        self.ids.insert(new_id.into(), section_number);
        Some(section_number)
    }

    /// Resolve an id to its section number.
    pub fn resolve(&self, id: &str) -> Option<SectionNumber> {
        self.ids
            .get(id)
            .copied()
            .or_else(|| section_number_from_id(id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_section_state_is_empty() {
        let state = SectionState::new(3, "source text");
        assert_eq!(state.section_number(), 3);
        assert_eq!(state.source_content(), "source text");
        assert!(!state.has_baseline());
        assert!(!state.has_user_content());
        assert!(!state.is_unmodified_mt());
        assert!(!state.is_human_modified());
        assert_eq!(state.current_mt_provider(), None);
    }

    #[test]
    fn test_empty_strings_are_not_content() {
        let mut state = SectionState::new(1, "x");
        state.set_unmodified_mt_content(Some(String::new()));
        state.set_user_translation_content(Some(String::new()));
        assert!(!state.has_baseline());
        assert!(!state.has_user_content());
        assert!(!state.is_unmodified_mt());
    }

    #[test]
    fn test_unmodified_vs_human_modified() {
        let mut state = SectionState::new(1, "x");
        state.set_unmodified_mt_content(Some("hola mundo".to_string()));
        state.set_user_translation_content(Some("hola mundo".to_string()));
        assert!(state.is_unmodified_mt());
        assert!(!state.is_human_modified());

        state.set_user_translation_content(Some("hola a todos".to_string()));
        assert!(!state.is_unmodified_mt());
        assert!(state.is_human_modified());
    }

    #[test]
    fn test_section_number_from_id() {
        assert_eq!(section_number_from_id("cxTargetSection12"), Some(12));
        assert_eq!(section_number_from_id("cxSourceSection0"), Some(0));
        assert_eq!(section_number_from_id("cxTargetSection"), None);
        assert_eq!(section_number_from_id(""), None);
    }

    #[test]
    fn test_canonical_ids() {
        assert_eq!(target_section_id(4), "cxTargetSection4");
        assert_eq!(source_section_id(4), "cxSourceSection4");
    }

    #[test]
    fn test_id_table_resolves_registered_and_embedded_ids() {
        let mut table = SectionIdTable::new();
        table.register_section(2);
        assert_eq!(table.resolve("cxTargetSection2"), Some(2));
        assert_eq!(table.resolve("cxSourceSection2"), Some(2));
        assert_eq!(table.resolve("cxTargetSection9"), Some(9));
        assert_eq!(table.resolve("mwAbc"), None);
    }

    #[test]
    fn test_id_table_rebind_keeps_section_identity() {
        let mut table = SectionIdTable::new();
        table.register_section(5);

        // A rebuilt node gets an id without the section number in it.
        assert_eq!(table.rebind("cxTargetSection5", "mw-rebuilt-node"), Some(5));
        assert_eq!(table.resolve("mw-rebuilt-node"), Some(5));
        assert_eq!(table.rebind("mw-unknown", "other"), None);
    }
}
