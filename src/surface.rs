//! Target editing surface.
//!
//! The rich-text editor lives outside this crate. The tracker and the session
//! only need to read the current content of a target section and the MT
//! provider the surface attributes it to.

use crate::html::plain_text;
use crate::section::SectionNumber;
use std::collections::HashMap;
use std::sync::RwLock;

/// Current state of one target section on the editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSectionSnapshot {
    /// Section HTML
    pub html: String,
    /// Provider the content was produced by (`source`, `scratch` or an MT
    /// engine id); `None` when nothing is attributed
    pub mt_provider: Option<String>,
}

impl TargetSectionSnapshot {
    pub fn new(html: impl Into<String>, mt_provider: Option<&str>) -> Self {
        Self {
            html: html.into(),
            mt_provider: mt_provider.map(str::to_string),
        }
    }

    pub fn text(&self) -> String {
        plain_text(&self.html)
    }
}

/// Read access to the target editing surface.
pub trait TargetSurface: Send + Sync {
    /// Snapshot of a target section, or `None` while the surface cannot
    /// provide it (not rendered yet, or being rebuilt).
    fn target_section(&self, section_number: SectionNumber) -> Option<TargetSectionSnapshot>;
}

/// Surface backed by a map, used by the CLI and by tests.
#[derive(Debug, Default)]
pub struct InMemorySurface {
    sections: RwLock<HashMap<SectionNumber, TargetSectionSnapshot>>,
}

impl InMemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_section(
        &self,
        section_number: SectionNumber,
        html: impl Into<String>,
        mt_provider: Option<&str>,
    ) {
        let mut sections = self
            .sections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sections.insert(section_number, TargetSectionSnapshot::new(html, mt_provider));
    }

    pub fn remove_section(&self, section_number: SectionNumber) {
        let mut sections = self
            .sections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sections.remove(&section_number);
    }
}

impl TargetSurface for InMemorySurface {
    fn target_section(&self, section_number: SectionNumber) -> Option<TargetSectionSnapshot> {
        let sections = self
            .sections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sections.get(&section_number).cloned()
    }
}
