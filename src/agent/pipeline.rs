//! Prompt → generation → speech for a single persona.

use crate::RawMessage;
use crate::conversation::{BudgetOutcome, PlaceholderValues, PromptBuilder, PromptCandidate, TokenBudgetTrimmer};
use crate::error::{ConfigError, Result};
use crate::llm::{GenerationResult, SamplingConfig, TextGenerationService};
use crate::persona::CharacterProfile;
use crate::speech::{SpeechPostProcessor, split_into_chunks};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A generated reply ready for moderation and posting.
#[derive(Debug, Clone)]
pub struct Response {
    pub persona_id: String,
    pub prompt: PromptCandidate,
    pub generation: GenerationResult,
    /// Post-processed speech, also fed back into the transcript.
    pub speech: String,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// No prompt window fits under the token ceiling; the backend was not called.
    NoPromptFits,
    /// The backend returned nothing postable.
    EmptyGeneration,
    Success(Response),
}

/// Builds prompts, calls the backend, and cleans the completion.
pub struct ResponsePipeline {
    generation: Arc<dyn TextGenerationService>,
    builder: PromptBuilder,
    trimmer: TokenBudgetTrimmer,
    postprocessor: SpeechPostProcessor,
    sampling: SamplingConfig,
    time_zone: chrono_tz::Tz,
    weather: String,
}

impl ResponsePipeline {
    pub fn new(
        generation: Arc<dyn TextGenerationService>,
        builder: PromptBuilder,
        trimmer: TokenBudgetTrimmer,
        postprocessor: SpeechPostProcessor,
        sampling: SamplingConfig,
        time_zone: chrono_tz::Tz,
        weather: impl Into<String>,
    ) -> Self {
        Self {
            generation,
            builder,
            trimmer,
            postprocessor,
            sampling,
            time_zone,
            weather: weather.into(),
        }
    }

    pub fn compute_mode(&self) -> crate::ComputeMode {
        self.generation.compute_mode()
    }

    /// Reply to the conversation as `persona`.
    ///
    /// Questions go through the inquiry prompt when the persona supports it;
    /// everything else through the windowed dialogue prompt.
    pub async fn respond(
        &self,
        messages: &[RawMessage],
        persona: &CharacterProfile,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome> {
        let prompt = match self.builder.inquiry_prompt(persona, messages) {
            Some((text, dialogue)) => {
                tracing::info!(persona = %persona.id, "using inquiry prompt");
                PromptCandidate::measure(self.generation.as_ref(), text, dialogue).await?
            }
            None => {
                let turns = self.builder.format_turns(messages);
                let placeholders =
                    PlaceholderValues::at(&now.with_timezone(&self.time_zone), self.weather.as_str());

                match self
                    .trimmer
                    .select(self.generation.as_ref(), &self.builder, persona, &turns, &placeholders)
                    .await?
                {
                    BudgetOutcome::Fits(candidate) => candidate,
                    BudgetOutcome::Overflow(candidate) => {
                        tracing::info!(
                            persona = %persona.id,
                            input_len = candidate.token_length,
                            ceiling = self.trimmer.ceiling(),
                            "newest turn alone exceeds token ceiling, skipping"
                        );
                        return Ok(ResponseOutcome::NoPromptFits);
                    }
                    BudgetOutcome::NoTurns => {
                        tracing::info!(persona = %persona.id, "no usable turns, skipping");
                        return Ok(ResponseOutcome::NoPromptFits);
                    }
                }
            }
        };

        self.complete(persona, prompt, "").await
    }

    /// Explain `word` as `persona`. The posted speech starts with the lead-in
    /// the prompt ends on.
    pub async fn explain(&self, persona: &CharacterProfile, word: &str) -> Result<ResponseOutcome> {
        let meaning = self
            .builder
            .meaning_prompt(persona, word)
            .ok_or_else(|| ConfigError::Invalid(format!("persona '{}' cannot explain words", persona.id)))?;

        let prompt =
            PromptCandidate::measure(self.generation.as_ref(), meaning.text, meaning.dialogue).await?;
        self.complete(persona, prompt, &meaning.lead_in).await
    }

    async fn complete(
        &self,
        persona: &CharacterProfile,
        prompt: PromptCandidate,
        lead_in: &str,
    ) -> Result<ResponseOutcome> {
        tracing::info!(persona = %persona.id, input_len = prompt.token_length, "generating reply");

        let raw_output = self.generation.generate(&prompt.token_ids, &self.sampling).await?;
        if raw_output.trim().is_empty() {
            tracing::warn!(persona = %persona.id, "backend returned an empty completion");
            return Ok(ResponseOutcome::EmptyGeneration);
        }

        let speech = self
            .postprocessor
            .process(&format!("{lead_in}{raw_output}"), persona);
        let chunks = split_into_chunks(&speech);
        if chunks.is_empty() {
            tracing::warn!(persona = %persona.id, %raw_output, "completion has no postable speech");
            return Ok(ResponseOutcome::EmptyGeneration);
        }

        tracing::info!(persona = %persona.id, %speech, chunks = chunks.len(), "reply generated");

        Ok(ResponseOutcome::Success(Response {
            persona_id: persona.id.clone(),
            prompt,
            generation: GenerationResult {
                raw_output,
                sampling_config: self.sampling.to_audit_value(),
            },
            speech,
            chunks,
        }))
    }
}
