//! Translation draft model.
//!
//! A `Translation` is the session-scoped identity of a draft: languages,
//! titles, source revision, categories and the ordered list of source
//! sections. It is created when a session starts (new draft, resumed draft
//! or republication) and is what the save and publish requests are built
//! from.

use crate::i18n::Language;
use crate::html::plain_text;
use crate::section::SectionNumber;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content of a persisted translation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitContent {
    pub content: String,
    /// MT provider (or `source`/`scratch`) that produced the content
    #[serde(default)]
    pub engine: Option<String>,
}

impl UnitContent {
    pub fn new(content: impl Into<String>, engine: Option<&str>) -> Self {
        Self {
            content: content.into(),
            engine: engine.map(str::to_string),
        }
    }
}

/// What the store has persisted for one section of a resumed draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedUnit {
    #[serde(default)]
    pub user: Option<UnitContent>,
    #[serde(default)]
    pub mt: Option<UnitContent>,
}

/// One source section of the article being translated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSection {
    pub section_number: SectionNumber,
    /// MediaWiki section index; 0 is the lead section
    #[serde(default)]
    pub mw_section_number: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    /// Section HTML
    pub content: String,
}

impl SourceSection {
    pub fn new(section_number: SectionNumber, content: impl Into<String>) -> Self {
        Self {
            section_number,
            mw_section_number: None,
            title: None,
            content: content.into(),
        }
    }

    pub fn with_mw_section(mut self, mw_section_number: u32) -> Self {
        self.mw_section_number = Some(mw_section_number);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_lead(&self) -> bool {
        self.mw_section_number == Some(0)
    }

    /// Plain text of the section, as used by the progress metrics.
    pub fn text(&self) -> String {
        plain_text(&self.content)
    }
}

/// A translation draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    /// Store id; `None` until the first successful save of a new draft
    #[serde(default)]
    pub id: Option<u64>,
    pub source_language: Language,
    pub target_language: Language,
    pub source_title: String,
    pub target_title: String,
    pub source_revision_id: u64,
    #[serde(default)]
    pub source_categories: Vec<String>,
    #[serde(default)]
    pub target_categories: Vec<String>,
    #[serde(default)]
    pub sections: Vec<SourceSection>,
    /// Persisted units of a resumed draft, by section number
    #[serde(default)]
    pub saved_units: BTreeMap<SectionNumber, SavedUnit>,
}

impl Translation {
    pub fn new(
        source_language: Language,
        target_language: Language,
        source_title: impl Into<String>,
        target_title: impl Into<String>,
        source_revision_id: u64,
    ) -> Self {
        Self {
            id: None,
            source_language,
            target_language,
            source_title: source_title.into(),
            target_title: target_title.into(),
            source_revision_id,
            source_categories: Vec::new(),
            target_categories: Vec::new(),
            sections: Vec::new(),
            saved_units: BTreeMap::new(),
        }
    }

    pub fn with_sections(mut self, sections: Vec<SourceSection>) -> Self {
        self.sections = sections;
        self
    }

    pub fn section(&self, section_number: SectionNumber) -> Option<&SourceSection> {
        self.sections
            .iter()
            .find(|section| section.section_number == section_number)
    }

    pub fn lead_section(&self) -> Option<&SourceSection> {
        self.sections.iter().find(|section| section.is_lead())
    }

    pub fn saved_unit(&self, section_number: SectionNumber) -> Option<&SavedUnit> {
        self.saved_units.get(&section_number)
    }

    /// Update the target title. Returns false when the title is unchanged.
    pub fn set_target_title(&mut self, title: &str) -> bool {
        if self.target_title == title {
            return false;
        }
        self.target_title = title.to_string();
        true
    }

    /// Replace the target categories. Returns false when they are unchanged.
    pub fn set_target_categories(&mut self, categories: Vec<String>) -> bool {
        if self.target_categories == categories {
            return false;
        }
        self.target_categories = categories;
        true
    }

    /// Whether the source page lives in the User namespace.
    pub fn is_user_page(&self) -> bool {
        self.source_title.starts_with("User:")
    }
}
