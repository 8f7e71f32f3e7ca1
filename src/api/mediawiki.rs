use super::{
    ApiError, LinkApi, LinkRequest, PublishApi, PublishRequest, PublishResponse, SaveApi,
    SaveRequest, SaveResponse,
};
use crate::config::Config;
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Token MediaWiki accepts from anonymous clients.
const ANONYMOUS_TOKEN: &str = "+\\";

/// HTTP client for the MediaWiki action API.
#[derive(Debug, Clone)]
pub struct MediaWikiClient {
    client: reqwest::Client,
    api_url: String,
    wikidata_api_url: String,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(api_url: impl Into<String>, wikidata_api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            wikidata_api_url: wikidata_api_url.into(),
            csrf_token: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_url, &config.wikidata_api_url)
            .with_csrf_token(config.csrf_token.clone())
    }

    pub fn with_csrf_token(mut self, token: Option<String>) -> Self {
        self.csrf_token = token;
        self
    }

    /// POST an action and return the decoded response body.
    async fn post_action(
        &self,
        url: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<Value, ApiError> {
        let action = params
            .iter()
            .find(|(key, _)| *key == "action")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        params.push(("format", "json".to_string()));
        params.push(("formatversion", "2".to_string()));
        params.push((
            "token",
            self.csrf_token
                .clone()
                .unwrap_or_else(|| ANONYMOUS_TOKEN.to_string()),
        ));

        debug!("Sending {} request to {}", action, url);
        let response = self.client.post(url).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(ApiError::Api {
                code: error["code"].as_str().unwrap_or("unknown").to_string(),
                info: error["info"].as_str().unwrap_or_default().to_string(),
            });
        }

        Ok(body)
    }
}

/// Take the result object of an action out of a response body.
fn action_result(mut body: Value, action: &str) -> Result<Value, ApiError> {
    match body.get_mut(action) {
        Some(result) => Ok(result.take()),
        None => Err(ApiError::Decode(format!(
            "Response has no '{}' member",
            action
        ))),
    }
}

#[async_trait]
impl SaveApi for MediaWikiClient {
    async fn save(&self, request: &SaveRequest) -> Result<SaveResponse, ApiError> {
        let body = self.post_action(&self.api_url, request.to_params()?).await?;
        let result = action_result(body, "cxsave")?;
        serde_json::from_value(result).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PublishApi for MediaWikiClient {
    async fn publish_section(
        &self,
        request: &PublishRequest,
    ) -> Result<PublishResponse, ApiError> {
        let body = self.post_action(&self.api_url, request.to_params()).await?;
        let result = action_result(body, "cxpublishsection")?;

        match result.get("result").and_then(Value::as_str) {
            Some("success") => {
                serde_json::from_value(result).map_err(|e| ApiError::Decode(e.to_string()))
            }
            other => Err(ApiError::Api {
                code: "publishfailed".to_string(),
                info: format!(
                    "Publishing ended with result {}",
                    other.unwrap_or("(none)")
                ),
            }),
        }
    }
}

#[async_trait]
impl LinkApi for MediaWikiClient {
    async fn link_titles(&self, request: &LinkRequest) -> Result<(), ApiError> {
        with_retry_if(
            &RetryConfig::link_call(),
            "wblinktitles",
            move || async move {
                self.post_action(&self.wikidata_api_url, request.to_params())
                    .await
                    .map(|_| ())
            },
            ApiError::is_recoverable,
        )
        .await
    }
}
