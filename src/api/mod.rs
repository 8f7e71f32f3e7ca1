//! Remote store interfaces.
//!
//! The session talks to three remote actions: `cxsave` for drafts,
//! `cxpublishsection` for publishing and `wblinktitles` on the Wikidata API
//! for the best-effort cross-wiki link. Each one is a trait so sessions can
//! run against the MediaWiki client or a test double.

mod mediawiki;

pub use mediawiki::MediaWikiClient;

use crate::section::SectionNumber;
use crate::tracker::TranslationProgress;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error code the API returns when the user session is gone.
pub const LOST_SESSION_CODE: &str = "assertuserfailed";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("Failed to decode API response: {0}")]
    Decode(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),

    #[error("Request task failed: {0}")]
    Task(String),
}

impl ApiError {
    /// Short machine-readable code, as reported in save failure events.
    pub fn code(&self) -> String {
        match self {
            ApiError::Transport(_) => "http".to_string(),
            ApiError::Status { status, .. } => format!("http-{}", status),
            ApiError::Api { code, .. } => code.clone(),
            ApiError::Decode(_) => "invalidresponse".to_string(),
            ApiError::Encode(_) => "invalidcontent".to_string(),
            ApiError::Task(_) => "internal".to_string(),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Network errors, rate limiting (429), server errors (5xx) and the
    /// API's own throttling codes are recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Task(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Api { code, .. } => {
                matches!(code.as_str(), "ratelimited" | "maxlag" | "readonly")
            }
            ApiError::Decode(_) | ApiError::Encode(_) => false,
        }
    }

    pub fn is_lost_session(&self) -> bool {
        matches!(self, ApiError::Api { code, .. } if code == LOST_SESSION_CODE)
    }
}

/// `cxsave` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub source_language: String,
    pub target_language: String,
    pub source_title: String,
    pub target_title: String,
    pub source_revision_id: u64,
    /// Encoded section records
    pub content: String,
    pub progress: TranslationProgress,
    pub target_categories: Option<Vec<String>>,
    pub source_categories: Option<Vec<String>>,
}

impl SaveRequest {
    /// Form parameters of the request, without the format and token fields.
    pub fn to_params(&self) -> Result<Vec<(&'static str, String)>, ApiError> {
        let encode = |e: serde_json::Error| ApiError::Encode(e.to_string());

        let mut params = vec![
            ("action", "cxsave".to_string()),
            ("assert", "user".to_string()),
            ("from", self.source_language.clone()),
            ("to", self.target_language.clone()),
            ("sourcetitle", self.source_title.clone()),
            ("title", self.target_title.clone()),
            ("sourcerevision", self.source_revision_id.to_string()),
            ("content", self.content.clone()),
            (
                "progress",
                serde_json::to_string(&self.progress).map_err(encode)?,
            ),
            ("cxversion", "2".to_string()),
        ];

        if let Some(categories) = &self.target_categories {
            params.push((
                "targetcategories",
                serde_json::to_string(categories).map_err(encode)?,
            ));
        }
        if let Some(categories) = &self.source_categories {
            params.push((
                "sourcecategories",
                serde_json::to_string(categories).map_err(encode)?,
            ));
        }

        Ok(params)
    }
}

/// Server-side message attached to a validation finding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidationWarning {
    #[serde(rename = "messageHtml", default)]
    pub message_html: Option<String>,
}

/// One abuse-filter finding for a section.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Validation {
    #[serde(default)]
    pub warn: Option<ValidationWarning>,
    /// The filter would block publishing
    #[serde(default, deserialize_with = "flag")]
    pub disallow: bool,
}

/// `cxsave` response.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SaveResponse {
    #[serde(rename = "translationid", default)]
    pub translation_id: Option<u64>,
    #[serde(default, deserialize_with = "validation_map")]
    pub validations: BTreeMap<String, Vec<Validation>>,
}

impl SaveResponse {
    /// Validation findings reported for a section, if the section was
    /// validated.
    pub fn validations_for(&self, section_number: SectionNumber) -> Option<&[Validation]> {
        self.validations
            .get(&section_number.to_string())
            .map(Vec::as_slice)
    }
}

// PHP serializes empty associative arrays as `[]` and keyed lists as objects,
// so both shapes have to be accepted at every level.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrMap<T> {
    List(Vec<T>),
    Map(BTreeMap<String, T>),
}

impl<T> ListOrMap<T> {
    fn into_values(self) -> Vec<T> {
        match self {
            ListOrMap::List(items) => items,
            ListOrMap::Map(items) => items.into_values().collect(),
        }
    }
}

fn validation_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<Validation>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<ListOrMap<ListOrMap<Validation>>> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(ListOrMap::List(_)) => BTreeMap::new(),
        Some(ListOrMap::Map(sections)) => sections
            .into_iter()
            .map(|(section, findings)| (section, findings.into_values()))
            .collect(),
    })
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(i64),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Number(value) => value != 0,
        Flag::Text(value) => !value.is_empty(),
        Flag::Other(value) => !value.is_null(),
    })
}

/// `cxpublishsection` request.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub html: String,
    pub source_title: String,
    pub target_title: String,
    pub source_section_title: String,
    pub target_section_title: String,
    pub source_language: String,
    pub target_language: String,
    pub source_revision_id: u64,
    pub is_sandbox: bool,
}

impl PublishRequest {
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("action", "cxpublishsection".to_string()),
            ("assert", "user".to_string()),
            ("html", self.html.clone()),
            ("sourcetitle", self.source_title.clone()),
            ("title", self.target_title.clone()),
            ("sourcesectiontitle", self.source_section_title.clone()),
            ("targetsectiontitle", self.target_section_title.clone()),
            ("sourcelanguage", self.source_language.clone()),
            ("targetlanguage", self.target_language.clone()),
            ("sourcerevid", self.source_revision_id.to_string()),
            ("issandbox", self.is_sandbox.to_string()),
        ]
    }
}

/// `cxpublishsection` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublishResponse {
    #[serde(rename = "targettitle")]
    pub target_title: String,
    #[serde(rename = "targeturl", default)]
    pub target_url: String,
}

/// `wblinktitles` request.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRequest {
    pub from_site: String,
    pub from_title: String,
    pub to_site: String,
    pub to_title: String,
}

impl LinkRequest {
    /// Link a published page to its source. The source site id is the target
    /// wiki id with its first occurrence of the target language replaced by
    /// the source language.
    pub fn new(
        wiki_id: &str,
        source_language: &str,
        target_language: &str,
        source_title: &str,
        target_title: &str,
    ) -> Self {
        Self {
            from_site: wiki_id.replacen(target_language, source_language, 1),
            from_title: source_title.to_string(),
            to_site: wiki_id.to_string(),
            to_title: target_title.to_string(),
        }
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("action", "wblinktitles".to_string()),
            ("fromsite", self.from_site.clone()),
            ("fromtitle", self.from_title.clone()),
            ("tosite", self.to_site.clone()),
            ("totitle", self.to_title.clone()),
        ]
    }
}

#[async_trait]
pub trait SaveApi: Send + Sync {
    async fn save(&self, request: &SaveRequest) -> Result<SaveResponse, ApiError>;
}

#[async_trait]
pub trait PublishApi: Send + Sync {
    async fn publish_section(&self, request: &PublishRequest)
        -> Result<PublishResponse, ApiError>;
}

#[async_trait]
pub trait LinkApi: Send + Sync {
    async fn link_titles(&self, request: &LinkRequest) -> Result<(), ApiError>;
}
