//! Draft files.
//!
//! A draft file is a JSON snapshot of a translation session: the translation
//! (languages, titles, source sections, persisted units) plus the current
//! content of the target sections on the editing surface.

use crate::section::SectionNumber;
use crate::surface::InMemorySurface;
use crate::translation::Translation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Current content of one target section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSection {
    pub html: String,
    #[serde(default)]
    pub mt_provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub translation: Translation,
    #[serde(default)]
    pub target_sections: BTreeMap<SectionNumber, DraftSection>,
}

impl Draft {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read draft file {}", path.display()))?;
        let draft: Draft =
            serde_json::from_str(&contents).context("Failed to parse draft file")?;

        info!(
            "Loaded draft {} -> {} with {} sections from {}",
            draft.translation.source_title,
            draft.translation.target_title,
            draft.translation.sections.len(),
            path.display()
        );
        Ok(draft)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write draft file {}", path.display()))?;
        Ok(())
    }

    /// An editing surface holding the target sections of the draft.
    pub fn surface(&self) -> InMemorySurface {
        let surface = InMemorySurface::new();
        for (section_number, section) in &self.target_sections {
            surface.set_section(*section_number, &section.html, section.mt_provider.as_deref());
        }
        surface
    }
}
