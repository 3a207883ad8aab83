//! HTTP client for a llama.cpp-compatible completion server.

use crate::ComputeMode;
use crate::error::{GenerationError, Result, truncate_body};
use crate::llm::{SamplingConfig, TextGenerationService, TokenIds};
use anyhow::Context as _;

/// Talks to `/tokenize` and `/completion` on a llama.cpp server.
pub struct LlamaServerClient {
    base_url: String,
    compute_mode: ComputeMode,
    /// HTTP client for making requests.
    http_client: reqwest::Client,
}

impl LlamaServerClient {
    pub fn new(
        base_url: impl Into<String>,
        compute_mode: ComputeMode,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            compute_mode,
            http_client,
        })
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|error| GenerationError::Request(error.to_string()))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|error| {
            GenerationError::Request(format!("failed to read response body: {error}"))
        })?;

        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate_body(&response_text),
            }
            .into());
        }

        serde_json::from_str(&response_text).map_err(|error| {
            GenerationError::InvalidResponse(format!(
                "{path} returned invalid JSON ({error}): {}",
                truncate_body(&response_text)
            ))
            .into()
        })
    }
}

#[async_trait::async_trait]
impl TextGenerationService for LlamaServerClient {
    async fn encode(&self, text: &str) -> Result<TokenIds> {
        let body = serde_json::json!({
            "content": text,
            "add_special": false,
        });
        let response = self.post_json("/tokenize", &body).await?;
        Ok(parse_tokens(&response)?)
    }

    async fn generate(&self, token_ids: &[u32], sampling: &SamplingConfig) -> Result<String> {
        tracing::debug!(input_len = token_ids.len(), mode = %self.compute_mode, "generating text");
        let started = std::time::Instant::now();

        let response = self
            .post_json("/completion", &completion_body(token_ids, sampling))
            .await?;
        let content = response["content"].as_str().ok_or_else(|| {
            GenerationError::InvalidResponse("completion response has no content".into())
        })?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_chars = content.chars().count(),
            "generation finished"
        );
        Ok(content.to_string())
    }

    fn compute_mode(&self) -> ComputeMode {
        self.compute_mode
    }
}

fn completion_body(token_ids: &[u32], sampling: &SamplingConfig) -> serde_json::Value {
    let temperature = if sampling.do_sample {
        sampling.temperature
    } else {
        0.0
    };

    serde_json::json!({
        "prompt": token_ids,
        "n_predict": sampling.max_new_tokens,
        "temperature": temperature,
        "top_p": sampling.top_p,
        "repeat_penalty": sampling.repetition_penalty,
        "stop": sampling.stop,
        "cache_prompt": true,
    })
}

fn parse_tokens(response: &serde_json::Value) -> std::result::Result<TokenIds, GenerationError> {
    let tokens = response["tokens"].as_array().ok_or_else(|| {
        GenerationError::InvalidResponse("tokenize response has no tokens array".into())
    })?;

    tokens
        .iter()
        .map(|token| {
            // Newer servers may return {"id", "piece"} objects.
            token
                .as_u64()
                .or_else(|| token["id"].as_u64())
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| GenerationError::InvalidResponse(format!("bad token id: {token}")))
        })
        .collect()
}
