//! Adult-content classification.

use crate::error::{ModerationError, Result};
use crate::error::truncate_body;
use anyhow::Context as _;

const PROVIDER: &str = "google_language_service";

const DEFAULT_ENDPOINT: &str = "https://language.googleapis.com/v1/documents:classifyText";

const ADULT_CATEGORY: &str = "/Adult";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierVerdict {
    pub is_adult: bool,
    /// Provider response, retained for auditing.
    pub raw: serde_json::Value,
}

#[async_trait::async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict>;
}

/// Google Cloud Natural Language `classifyText` with the V2 category model.
pub struct GoogleLanguageClassifier {
    api_key: String,
    endpoint: String,
    http_client: reqwest::Client,
}

impl GoogleLanguageClassifier {
    pub fn new(api_key: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http_client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait::async_trait]
impl ContentClassifier for GoogleLanguageClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(text))
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

        let raw: serde_json::Value =
            serde_json::from_str(&response_text).map_err(|error| ModerationError::InvalidResponse {
                provider: PROVIDER,
                message: format!("invalid JSON ({error}): {}", truncate_body(&response_text)),
            })?;

        Ok(ClassifierVerdict {
            is_adult: has_adult_category(&raw),
            raw,
        })
    }
}

fn request_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "document": {
            "type": "PLAIN_TEXT",
            "content": text,
            "language": "ja",
        },
        "classificationModelOptions": {
            "v2Model": {
                "contentCategoriesVersion": "V2",
            },
        },
    })
}

/// A missing `categories` field means nothing was detected.
fn has_adult_category(response: &serde_json::Value) -> bool {
    response["categories"]
        .as_array()
        .is_some_and(|categories| {
            categories
                .iter()
                .any(|category| category["name"].as_str() == Some(ADULT_CATEGORY))
        })
}
