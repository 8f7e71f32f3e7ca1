//! Pending section saves.

use crate::section::SectionNumber;
use std::collections::BTreeMap;

/// Translated side of a queued section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPayload {
    pub content: String,
    pub mt_provider: Option<String>,
}

/// Source side of a queued section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePayload {
    pub content: String,
}

/// Everything needed to save one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPayload {
    pub section_number: SectionNumber,
    pub translation: TranslationPayload,
    pub source: SourcePayload,
}

impl SectionPayload {
    pub fn new(
        section_number: SectionNumber,
        translation_content: impl Into<String>,
        mt_provider: Option<&str>,
        source_content: impl Into<String>,
    ) -> Self {
        Self {
            section_number,
            translation: TranslationPayload {
                content: translation_content.into(),
                mt_provider: mt_provider.map(str::to_string),
            },
            source: SourcePayload {
                content: source_content.into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedSection {
    payload: SectionPayload,
    revision: u64,
}

/// Last-write-wins queue of section payloads.
///
/// Every upsert gets a new revision number, so a save that completes after
/// the section was queued again can tell that its copy is stale.
#[derive(Debug, Default, Clone)]
pub struct SaveQueue {
    entries: BTreeMap<SectionNumber, QueuedSection>,
    next_revision: u64,
}

impl SaveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the payload of a section. Returns its revision.
    pub fn upsert(&mut self, payload: SectionPayload) -> u64 {
        self.next_revision += 1;
        let revision = self.next_revision;
        self.entries
            .insert(payload.section_number, QueuedSection { payload, revision });
        revision
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, section_number: SectionNumber) -> Option<&SectionPayload> {
        self.entries
            .get(&section_number)
            .map(|entry| &entry.payload)
    }

    pub fn revision(&self, section_number: SectionNumber) -> Option<u64> {
        self.entries.get(&section_number).map(|entry| entry.revision)
    }

    /// Payloads and revisions of every queued section, by section number.
    pub fn snapshot(&self) -> Vec<(SectionPayload, u64)> {
        self.entries
            .values()
            .map(|entry| (entry.payload.clone(), entry.revision))
            .collect()
    }

    /// Remove a section if it still holds the given revision.
    pub fn remove_if_revision(&mut self, section_number: SectionNumber, revision: u64) -> bool {
        match self.entries.get(&section_number) {
            Some(entry) if entry.revision == revision => {
                self.entries.remove(&section_number);
                true
            }
            _ => false,
        }
    }

    pub fn section_numbers(&self) -> Vec<SectionNumber> {
        self.entries.keys().copied().collect()
    }
}
