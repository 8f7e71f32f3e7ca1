//! Splitting a published translation into per-section drafts.
//!
//! When the lead section of an article is published, every other section the
//! user already translated becomes a section draft of its own, so it can be
//! picked up later from the section translation flow.

use crate::html::first_element_text;
use crate::translation::{Translation, UnitContent};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Progress of a freshly split section draft; nothing is measured yet.
pub const UNMEASURED_PROGRESS: &str = r#"{"any":null,"mt":null,"human":null}"#;

/// A persisted translation unit as stored in the parallel corpora.
#[derive(Debug, Clone, PartialEq)]
pub struct CorporaUnit {
    /// `{revision}_{mwSection}_{subSection}`, or a bare id for units that
    /// predate MediaWiki section numbering
    pub section_id: String,
    pub user: Option<UnitContent>,
    pub mt: Option<UnitContent>,
}

impl CorporaUnit {
    pub fn new(
        section_id: impl Into<String>,
        user: Option<UnitContent>,
        mt: Option<UnitContent>,
    ) -> Self {
        Self {
            section_id: section_id.into(),
            user,
            mt,
        }
    }

    fn parts(&self) -> Option<(&str, u32)> {
        let mut parts = self.section_id.split('_');
        let revision = parts.next()?;
        let mw_section = parts.next()?.parse().ok()?;
        parts.next()?;
        Some((revision, mw_section))
    }

    /// MediaWiki section number, when the id carries one.
    pub fn mw_section_number(&self) -> Option<u32> {
        self.parts().map(|(_, mw_section)| mw_section)
    }

    /// `{revision}_{mwSection}` prefix shared by the units of one section.
    pub fn base_section_id(&self) -> Option<String> {
        self.parts()
            .map(|(revision, mw_section)| format!("{}_{}", revision, mw_section))
    }

    /// Translated content: the user's version, else the MT version.
    pub fn translated_content(&self) -> &str {
        self.user
            .as_ref()
            .or(self.mt.as_ref())
            .map(|unit| unit.content.as_str())
            .unwrap_or("")
    }
}

/// A new section draft produced by the splitter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSection {
    pub base_section_id: String,
    pub mw_section_number: u32,
    pub source_section_title: String,
    pub target_section_title: String,
    pub progress: String,
}

pub trait SectionSplitter: Send + Sync {
    /// Section drafts for everything translated outside the lead section.
    fn split(&self, translation: &Translation) -> Vec<SplitSection>;
}

/// Splits by MediaWiki section number.
#[derive(Debug, Clone, Copy, Default)]
pub struct MwSectionSplitter;

impl MwSectionSplitter {
    /// Corpora units of a draft, one per section with saved content.
    pub fn corpora_units(translation: &Translation) -> Vec<CorporaUnit> {
        translation
            .saved_units
            .iter()
            .map(|(section_number, unit)| {
                let section_id = match translation
                    .section(*section_number)
                    .and_then(|section| section.mw_section_number)
                {
                    Some(mw_section) => format!(
                        "{}_{}_{}",
                        translation.source_revision_id, mw_section, section_number
                    ),
                    None => section_number.to_string(),
                };
                CorporaUnit::new(section_id, unit.user.clone(), unit.mt.clone())
            })
            .collect()
    }

    /// Source section titles by MediaWiki section number.
    pub fn source_titles(translation: &Translation) -> BTreeMap<u32, String> {
        translation
            .sections
            .iter()
            .filter_map(|section| Some((section.mw_section_number?, section.title.clone()?)))
            .collect()
    }

    /// Split corpora units against the titles of the source revision.
    ///
    /// Returns nothing when a unit has no MediaWiki section number or refers
    /// to a section missing from `source_titles`.
    pub fn split_units(
        units: &[CorporaUnit],
        source_titles: &BTreeMap<u32, String>,
    ) -> Vec<SplitSection> {
        if let Some(unit) = units.iter().find(|unit| unit.mw_section_number().is_none()) {
            warn!(
                "Translation unit {} has no section number, not splitting",
                unit.section_id
            );
            return Vec::new();
        }

        let mut by_section: BTreeMap<u32, Vec<&CorporaUnit>> = BTreeMap::new();
        for unit in units {
            match unit.mw_section_number() {
                Some(0) | None => {}
                Some(mw_section) => by_section.entry(mw_section).or_default().push(unit),
            }
        }

        if by_section.is_empty() {
            return Vec::new();
        }
        if source_titles.is_empty() {
            warn!("No source section titles, not splitting");
            return Vec::new();
        }
        if let Some(missing) = by_section
            .keys()
            .find(|mw_section| !source_titles.contains_key(*mw_section))
        {
            warn!("Source section {} not found, not splitting", missing);
            return Vec::new();
        }

        by_section
            .into_iter()
            .filter_map(|(mw_section, units)| {
                let source_section_title = source_titles.get(&mw_section)?.clone();
                let target_section_title =
                    first_heading(&units).unwrap_or_else(|| source_section_title.clone());
                Some(SplitSection {
                    base_section_id: units.first()?.base_section_id()?,
                    mw_section_number: mw_section,
                    source_section_title,
                    target_section_title,
                    progress: UNMEASURED_PROGRESS.to_string(),
                })
            })
            .collect()
    }
}

impl SectionSplitter for MwSectionSplitter {
    fn split(&self, translation: &Translation) -> Vec<SplitSection> {
        let sections = Self::split_units(
            &Self::corpora_units(translation),
            &Self::source_titles(translation),
        );
        debug!("Split translation into {} section drafts", sections.len());
        sections
    }
}

/// Text of the first `<h2>` in the translated content of the units.
fn first_heading(units: &[&CorporaUnit]) -> Option<String> {
    let html: String = units.iter().map(|unit| unit.translated_content()).collect();
    first_element_text(&html, "h2")
}
