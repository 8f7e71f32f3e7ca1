//! Publishing a translated section.
//!
//! Publishing saves the draft first, then asks the server to publish the
//! section and, for lead sections of real articles, links the new page to its
//! source on Wikidata. Failures come back as a feedback message telling
//! whether saving or publishing went wrong; the draft is left as it was so
//! the user can try again.

mod splitter;

pub use splitter::{CorporaUnit, MwSectionSplitter, SectionSplitter, SplitSection};

use crate::api::{LinkApi, LinkRequest, PublishApi, PublishRequest};
use crate::events::{EventBus, SessionEvent};
use crate::save::{SaveError, SaveReceipt};
use crate::section::SectionNumber;
use crate::translation::{SourceSection, Translation};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Forces a save of the current draft.
#[async_trait]
pub trait SaveGateway: Send + Sync {
    /// Save everything pending. `Ok(None)` when there was nothing to save.
    async fn force_save(&self) -> Result<Option<SaveReceipt>, SaveError>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no current session")]
    NoCurrentSession,

    #[error("Publishing {target_title} returned no target URL")]
    MissingTargetUrl { target_title: String },

    #[error("Invalid target URL {url}: {reason}")]
    InvalidTargetUrl { url: String, reason: String },
}

/// Phase in which publishing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishStatus {
    #[serde(rename = "saving error")]
    SavingError,
    #[serde(rename = "publishing error")]
    PublishingError,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::SavingError => "saving error",
            PublishStatus::PublishingError => "publishing error",
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishFeedbackMessage {
    pub text: String,
    pub status: PublishStatus,
    /// Trying again later may succeed
    pub recoverable: bool,
}

impl PublishFeedbackMessage {
    pub fn new(text: impl Into<String>, status: PublishStatus, recoverable: bool) -> Self {
        Self {
            text: text.into(),
            status,
            recoverable,
        }
    }
}

/// A section that is live on the target wiki.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedSection {
    pub target_title: String,
    pub target_url: String,
    pub target_section_title: String,
    /// Section drafts created from the rest of the translation
    pub split_sections: Vec<SplitSection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(PublishedSection),
    Failed(PublishFeedbackMessage),
}

/// The section being published and its translated content.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishContext {
    pub translation: Translation,
    pub section_number: SectionNumber,
    pub target_section_title: String,
    /// Translated sub-section HTML, in document order
    pub sub_sections: Vec<String>,
    /// The target is a user sandbox page
    pub is_sandbox: bool,
}

impl PublishContext {
    pub fn new(
        translation: Translation,
        section_number: SectionNumber,
        target_section_title: impl Into<String>,
    ) -> Self {
        Self {
            translation,
            section_number,
            target_section_title: target_section_title.into(),
            sub_sections: Vec::new(),
            is_sandbox: false,
        }
    }

    pub fn with_sub_sections(mut self, sub_sections: Vec<String>) -> Self {
        self.sub_sections = sub_sections;
        self
    }

    pub fn with_sandbox(mut self, is_sandbox: bool) -> Self {
        self.is_sandbox = is_sandbox;
        self
    }

    pub fn source_section(&self) -> Option<&SourceSection> {
        self.translation.section(self.section_number)
    }

    pub fn is_lead_section(&self) -> bool {
        self.source_section().is_some_and(SourceSection::is_lead)
    }

    /// HTML of the published section.
    pub fn html(&self) -> String {
        self.sub_sections.concat()
    }

    pub fn request(&self) -> PublishRequest {
        let translation = &self.translation;
        PublishRequest {
            html: self.html(),
            source_title: translation.source_title.clone(),
            target_title: translation.target_title.clone(),
            source_section_title: self
                .source_section()
                .and_then(|section| section.title.clone())
                .unwrap_or_default(),
            target_section_title: self.target_section_title.clone(),
            source_language: translation.source_language.code().to_string(),
            target_language: translation.target_language.code().to_string(),
            source_revision_id: translation.source_revision_id,
            is_sandbox: self.is_sandbox,
        }
    }

    /// Whether the published page should be linked to its source on Wikidata.
    pub fn should_link(&self) -> bool {
        self.is_lead_section() && !self.is_sandbox && !self.translation.is_user_page()
    }
}

pub struct PublishPipeline {
    publish_api: Arc<dyn PublishApi>,
    link_api: Arc<dyn LinkApi>,
    splitter: Arc<dyn SectionSplitter>,
    wiki_id: String,
    events: EventBus,
}

impl PublishPipeline {
    pub fn new(
        publish_api: Arc<dyn PublishApi>,
        link_api: Arc<dyn LinkApi>,
        wiki_id: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            publish_api,
            link_api,
            splitter: Arc::new(MwSectionSplitter),
            wiki_id: wiki_id.into(),
            events,
        }
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn SectionSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Save the draft and publish the current section.
    ///
    /// Fails without any request when there is no current session.
    pub async fn publish(
        &self,
        context: Option<&PublishContext>,
        gateway: &dyn SaveGateway,
    ) -> Result<PublishOutcome, PublishError> {
        let context = context.ok_or(PublishError::NoCurrentSession)?;
        let translation = &context.translation;

        if let Err(e) = gateway.force_save().await {
            error!("Saving before publishing failed: {}", e);
            return Ok(self.failed(PublishFeedbackMessage::new(
                e.to_string(),
                PublishStatus::SavingError,
                e.is_recoverable(),
            )));
        }

        info!(
            "Publishing section {} of {} to {}",
            context.section_number, translation.source_title, translation.target_title
        );
        let response = match self.publish_api.publish_section(&context.request()).await {
            Ok(response) => response,
            Err(e) => {
                error!("Publishing failed: {}", e);
                return Ok(self.failed(PublishFeedbackMessage::new(
                    e.to_string(),
                    PublishStatus::PublishingError,
                    e.is_recoverable(),
                )));
            }
        };

        if response.target_url.is_empty() {
            return Err(PublishError::MissingTargetUrl {
                target_title: response.target_title,
            });
        }

        if context.should_link() {
            let request = LinkRequest::new(
                &self.wiki_id,
                translation.source_language.code(),
                translation.target_language.code(),
                &translation.source_title,
                &response.target_title,
            );
            if let Err(e) = self.link_api.link_titles(&request).await {
                warn!("Error while adding wikibase link: {}", e);
            }
        }

        let split_sections = if context.is_lead_section() {
            self.splitter.split(translation)
        } else {
            Vec::new()
        };

        info!("Published {} at {}", response.target_title, response.target_url);
        self.events.emit(SessionEvent::Published {
            target_title: response.target_title.clone(),
            target_url: response.target_url.clone(),
        });

        Ok(PublishOutcome::Published(PublishedSection {
            target_title: response.target_title,
            target_url: response.target_url,
            target_section_title: context.target_section_title.clone(),
            split_sections,
        }))
    }

    fn failed(&self, feedback: PublishFeedbackMessage) -> PublishOutcome {
        self.events.emit(SessionEvent::PublishFailed {
            status: feedback.status.to_string(),
            text: feedback.text.clone(),
        });
        PublishOutcome::Failed(feedback)
    }
}

/// Address of the published page with the follow-up query parameters.
pub fn published_page_url(
    published: &PublishedSection,
    translation: &Translation,
) -> Result<String, PublishError> {
    let mut url = Url::parse(&published.target_url).map_err(|e| PublishError::InvalidTargetUrl {
        url: published.target_url.clone(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("sx-published-section", &published.target_section_title)
        .append_pair("sx-source-page-title", &translation.source_title)
        .append_pair("sx-source-language", translation.source_language.code())
        .append_pair("sx-target-language", translation.target_language.code());
    Ok(url.to_string())
}
