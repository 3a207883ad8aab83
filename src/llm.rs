//! Text generation backend interface.

pub mod llama;
pub mod sampling;

pub use llama::LlamaServerClient;
pub use sampling::SamplingConfig;

use crate::ComputeMode;
use crate::error::Result;

/// Token ids as produced by the backend tokenizer.
pub type TokenIds = Vec<u32>;

/// Opaque text generation backend.
///
/// The backend is treated as a singleton that must not serve concurrent
/// requests; callers serialize access through the worker queue.
#[async_trait::async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Tokenize a prompt without special tokens.
    async fn encode(&self, text: &str) -> Result<TokenIds>;

    /// Continue the given prompt. Returns only the newly generated text.
    async fn generate(&self, token_ids: &[u32], sampling: &SamplingConfig) -> Result<String>;

    /// Hardware the backend is running on.
    fn compute_mode(&self) -> ComputeMode;
}

/// Raw completion plus the sampling parameters that produced it.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub raw_output: String,
    pub sampling_config: serde_json::Value,
}
