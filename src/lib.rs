//! Translation-session tracking and draft saving for wiki content
//! translation.
//!
//! A session follows the edits a translator makes to the target sections of
//! an article, measures how much of the machine translation was kept, saves
//! the draft to the wiki in the background and publishes finished sections.

pub mod api;
pub mod config;
pub mod draft;
pub mod events;
pub mod html;
pub mod i18n;
pub mod payload;
pub mod publish;
pub mod retry;
pub mod save;
pub mod scheduling;
pub mod section;
pub mod session;
pub mod surface;
pub mod tokens;
pub mod tracker;
pub mod translation;
