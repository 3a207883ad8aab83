//! DialogueRouter: decides who answers an event, where, and posts the result.

use crate::agent::{Response, ResponseOutcome, ResponsePipeline};
use crate::audit::{AuditRecord, AuditSink};
use crate::error::{EventError, Result};
use crate::messaging::{ChatPosterDyn, OutgoingMessage};
use crate::moderation::ModerationGateway;
use crate::persona::{CharacterProfile, PersonaSet};
use crate::pubsub::{Pong, PongPublisher, ping_timestamp, pong_topic};
use crate::speech::strip_single_trailing_period;
use crate::{InboundEvent, RawMessage};

use chrono::{DateTime, Utc};
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom as _;
use std::sync::Arc;

/// Collaborators the router drives.
pub struct RouterDeps {
    pub pipeline: ResponsePipeline,
    pub personas: Arc<PersonaSet>,
    pub moderation: ModerationGateway,
    pub poster: Arc<dyn ChatPosterDyn>,
    pub audit: Arc<dyn AuditSink>,
    pub pongs: Arc<dyn PongPublisher>,
}

/// Placement, pacing and identity knobs.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Channel every reply is posted to.
    pub channel: String,
    /// Account id the personas post under.
    pub automation_bot_id: String,
    /// Replies go to a thread when the trigger is older than this.
    pub thread_stale_after: chrono::Duration,
    /// Pings older (or newer) than this are ignored.
    pub ping_freshness: chrono::Duration,
    /// Delay between consecutive posts of one event.
    pub post_pacing: std::time::Duration,
    pub censor_marker: String,
}

/// Handles one inbound event at a time.
pub struct DialogueRouter {
    deps: RouterDeps,
    settings: RouterSettings,
    rng: StdRng,
    /// Whether the current event has posted anything yet.
    posted_in_event: bool,
}

impl DialogueRouter {
    pub fn new(deps: RouterDeps, settings: RouterSettings) -> Self {
        Self::with_rng(deps, settings, StdRng::from_os_rng())
    }

    pub fn with_rng(deps: RouterDeps, settings: RouterSettings, rng: StdRng) -> Self {
        Self {
            deps,
            settings,
            rng,
            posted_in_event: false,
        }
    }

    /// Decode and dispatch a raw payload. Failures are logged, never returned:
    /// the caller acknowledges the event either way.
    pub async fn handle(&mut self, payload: &[u8]) {
        let event = match InboundEvent::decode(payload) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, "dropping malformed event");
                return;
            }
        };

        let kind = event.kind();
        tracing::info!(kind, "handling event");
        if let Err(error) = self.dispatch_at(event, Utc::now()).await {
            tracing::error!(kind, error = %format!("{error:#}"), "event handling failed");
        }
    }

    pub async fn dispatch_at(&mut self, event: InboundEvent, now: DateTime<Utc>) -> Result<()> {
        self.posted_in_event = false;
        match event {
            InboundEvent::ResponseTrigger { human_messages } => {
                self.respond_to_trigger(human_messages, now).await
            }
            InboundEvent::MeaningLookup { word, thread_ref } => {
                let personas = Arc::clone(&self.deps.personas);
                let Some(persona) = personas.meaning_persona() else {
                    tracing::warn!(%word, "no persona can explain words");
                    return Ok(());
                };
                self.explain(persona, &word, thread_ref.as_deref(), &[]).await
            }
            InboundEvent::KeepAlivePing { ping_topic_id } => self.answer_ping(&ping_topic_id, now).await,
            InboundEvent::BenchmarkSubmission => {
                tracing::debug!("ignoring benchmark submission");
                Ok(())
            }
        }
    }

    async fn respond_to_trigger(
        &mut self,
        mut messages: Vec<RawMessage>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let last = messages.last().ok_or(EventError::EmptyTrigger)?;
        let trigger_text = last.text.clone().unwrap_or_default();
        let thread_ref = placement(last, now, self.settings.thread_stale_after);

        let personas = Arc::clone(&self.deps.personas);

        if let Some((persona, word)) = personas.definition_request(&trigger_text) {
            tracing::info!(persona = %persona.id, %word, "definition requested");
            return self
                .explain(persona, word, thread_ref.as_deref(), &messages)
                .await;
        }

        let triggered = personas.triggered_by(&trigger_text);
        if triggered.is_empty() {
            let pool = personas.fallback_pool(&trigger_text);
            let Some(persona) = pool.choose(&mut self.rng).copied() else {
                return Ok(());
            };
            tracing::info!(persona = %persona.id, "no persona named, picked at random");
            if let Some(response) = self.generate(&messages, persona, now).await? {
                self.deliver(persona, &response, thread_ref.as_deref(), &messages)
                    .await?;
            }
            return Ok(());
        }

        for persona in triggered {
            tracing::info!(persona = %persona.id, "persona triggered");
            let Some(response) = self.generate(&messages, persona, now).await? else {
                continue;
            };
            self.deliver(persona, &response, thread_ref.as_deref(), &messages)
                .await?;

            // Later personas see this reply in their context.
            messages.push(RawMessage::from_bot(
                self.settings.automation_bot_id.clone(),
                persona.platform_display_name.clone(),
                response.speech,
            ));
        }

        Ok(())
    }

    async fn generate(
        &self,
        messages: &[RawMessage],
        persona: &CharacterProfile,
        now: DateTime<Utc>,
    ) -> Result<Option<Response>> {
        Ok(match self.deps.pipeline.respond(messages, persona, now).await? {
            ResponseOutcome::Success(response) => Some(response),
            ResponseOutcome::NoPromptFits | ResponseOutcome::EmptyGeneration => None,
        })
    }

    async fn explain(
        &mut self,
        persona: &CharacterProfile,
        word: &str,
        thread_ref: Option<&str>,
        messages: &[RawMessage],
    ) -> Result<()> {
        match self.deps.pipeline.explain(persona, word).await? {
            ResponseOutcome::Success(response) => {
                self.deliver(persona, &response, thread_ref, messages).await
            }
            ResponseOutcome::NoPromptFits | ResponseOutcome::EmptyGeneration => Ok(()),
        }
    }

    /// Moderate, post and audit each chunk in order. Every post after the
    /// first one of the event waits `post_pacing`.
    async fn deliver(
        &mut self,
        persona: &CharacterProfile,
        response: &Response,
        thread_ref: Option<&str>,
        input_messages: &[RawMessage],
    ) -> Result<()> {
        for (chunk_index, chunk) in response.chunks.iter().enumerate() {
            let chunk = strip_single_trailing_period(chunk);
            if chunk.is_empty() {
                continue;
            }

            let verdict = self.deps.moderation.check(chunk).await?;
            let posted_text = if verdict.blocked {
                tracing::warn!(persona = %persona.id, chunk_index, "chunk blocked by moderation");
                self.settings.censor_marker.clone()
            } else {
                chunk.to_string()
            };

            if self.posted_in_event && !self.settings.post_pacing.is_zero() {
                tokio::time::sleep(self.settings.post_pacing).await;
            }

            let message = OutgoingMessage {
                channel: self.settings.channel.clone(),
                text: posted_text.clone(),
                thread_ref: thread_ref.map(str::to_string),
                username: persona.platform_display_name.clone(),
                icon_url: persona.platform_icon_url.clone(),
            };
            let receipt = self.deps.poster.post(&message).await?;
            self.posted_in_event = true;

            let record = AuditRecord {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                character: persona.id.clone(),
                input_messages: input_messages.to_vec(),
                input_text: response.prompt.text.clone(),
                input_dialogue: response.prompt.dialogue_rendering.clone(),
                input_token_length: response.prompt.token_length,
                output: response.generation.raw_output.clone(),
                output_speech: response.speech.clone(),
                chunk: chunk.to_string(),
                posted_text,
                sampling_config: response.generation.sampling_config.clone(),
                platform_message: receipt.raw,
                platform_message_ref: receipt.message_ref,
                moderation_details: verdict.provider_details,
                thread_ref: thread_ref.map(str::to_string),
                dry_run: self.deps.poster.is_dry_run(),
            };
            self.deps.audit.record(&record).await?;
        }

        Ok(())
    }

    async fn answer_ping(&self, ping_topic_id: &str, now: DateTime<Utc>) -> Result<()> {
        let sent_at_ms = ping_timestamp(ping_topic_id)?;
        let age_ms = now.timestamp_millis() - sent_at_ms;
        if age_ms.abs() > self.settings.ping_freshness.num_milliseconds() {
            tracing::debug!(%ping_topic_id, age_ms, "ignoring stale ping");
            return Ok(());
        }

        let topic = pong_topic(ping_topic_id)?;
        let pong = Pong {
            ping_topic_id: ping_topic_id.to_string(),
            mode: self.deps.pipeline.compute_mode(),
        };
        self.deps.pongs.publish(&topic, &pong).await
    }
}

/// Thread to reply in: the trigger's thread when the trigger is stale,
/// otherwise none (reply in channel).
pub fn placement(
    last: &RawMessage,
    now: DateTime<Utc>,
    stale_after: chrono::Duration,
) -> Option<String> {
    let sent_at = last.sent_at()?;
    if now - sent_at > stale_after {
        last.thread_root().map(str::to_string)
    } else {
        None
    }
}
