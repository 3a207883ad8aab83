//! Profanity term screening.

use crate::error::{ModerationError, Result};
use crate::error::truncate_body;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "azure_content_moderator";

/// A term the screener matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Term {
    pub term: String,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub original_index: Option<u32>,
    #[serde(default)]
    pub list_id: Option<u32>,
}

impl Term {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            index: None,
            original_index: None,
            list_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerVerdict {
    /// `None` when the provider reported no term list at all.
    pub terms: Option<Vec<Term>>,
    /// Provider response, retained for auditing.
    pub raw: serde_json::Value,
}

#[async_trait::async_trait]
pub trait TermScreener: Send + Sync {
    async fn screen(&self, text: &str) -> Result<ScreenerVerdict>;
}

/// True when any matched term is outside the allow-list.
pub fn has_offensive_term(terms: Option<&[Term]>, allow_list: &[String]) -> bool {
    terms.is_some_and(|terms| {
        terms
            .iter()
            .any(|term| !allow_list.iter().any(|allowed| *allowed == term.term))
    })
}

/// Azure Content Moderator `ProcessText/Screen` for Japanese text.
pub struct AzureContentModerator {
    endpoint: String,
    subscription_key: String,
    http_client: reqwest::Client,
}

impl AzureContentModerator {
    pub fn new(
        endpoint: impl Into<String>,
        subscription_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_key: subscription_key.into(),
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl TermScreener for AzureContentModerator {
    async fn screen(&self, text: &str) -> Result<ScreenerVerdict> {
        let url = format!(
            "{}/contentmoderator/moderate/v1.0/ProcessText/Screen",
            self.endpoint
        );

        let response = self
            .http_client
            .post(&url)
            .query(&[
                ("language", "jpn"),
                ("autocorrect", "false"),
                ("PII", "false"),
                ("classify", "false"),
            ])
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(text.to_string())
            .send()
            .await
            .map_err(|error| ModerationError::Request {
                provider: PROVIDER,
                message: error.to_string(),
            })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|error| ModerationError::Request {
            provider: PROVIDER,
            message: format!("failed to read response body: {error}"),
        })?;

        if !status.is_success() {
            return Err(ModerationError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: truncate_body(&response_text),
            }
            .into());
        }

        let raw: serde_json::Value = serde_json::from_str(&response_text).map_err(|error| {
            ModerationError::InvalidResponse {
                provider: PROVIDER,
                message: format!("invalid JSON ({error}): {}", truncate_body(&response_text)),
            }
        })?;

        Ok(ScreenerVerdict {
            terms: parse_terms(&raw)?,
            raw,
        })
    }
}

fn parse_terms(response: &serde_json::Value) -> std::result::Result<Option<Vec<Term>>, ModerationError> {
    match response.get("Terms") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(terms) => serde_json::from_value(terms.clone())
            .map(Some)
            .map_err(|error| ModerationError::InvalidResponse {
                provider: PROVIDER,
                message: format!("bad Terms field: {error}"),
            }),
    }
}
