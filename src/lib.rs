//! rinnabot: a multi-persona chat agent that turns recent dialogue into
//! token-bounded prompts, generates replies, and posts moderated chunks.

pub mod agent;
pub mod audit;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod messaging;
pub mod moderation;
pub mod persona;
pub mod pubsub;
pub mod speech;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Persona identifier (also the persona's informal alias, e.g. `うな`).
pub type PersonaId = String;

/// One chat message as delivered by the event source.
///
/// Field names follow the Slack message payload so upstream producers can
/// forward messages verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "user", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, rename = "username", skip_serializing_if = "Option::is_none")]
    pub bot_username: Option<String>,
    #[serde(default, rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl RawMessage {
    /// Message sent by a human user.
    pub fn from_user(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            sender_id: Some(sender_id.into()),
            ..Default::default()
        }
    }

    /// Message posted by the automation account under a persona's display name.
    pub fn from_bot(
        bot_id: impl Into<String>,
        bot_username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            text: Some(text.into()),
            bot_id: Some(bot_id.into()),
            bot_username: Some(bot_username.into()),
            ..Default::default()
        }
    }

    /// Parse the platform timestamp (`"1700000000.000100"`, seconds) into UTC.
    pub fn sent_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.timestamp.as_deref()?;
        let (secs, frac) = raw.split_once('.').unwrap_or((raw, "0"));
        let secs: i64 = secs.parse().ok()?;
        let micros: u32 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
        chrono::DateTime::from_timestamp(secs, micros * 1_000)
    }

    /// The thread this message belongs to, or the message itself as a thread root.
    pub fn thread_root(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.timestamp.as_deref())
    }
}

/// Inbound events, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    /// Recent channel history; the last message is the trigger.
    ResponseTrigger { human_messages: Vec<RawMessage> },
    /// Ask the meaning persona to explain a word.
    MeaningLookup {
        word: String,
        #[serde(default)]
        thread_ref: Option<String>,
    },
    /// Liveness ping. The topic id ends with a millisecond timestamp.
    KeepAlivePing { ping_topic_id: String },
    /// Accepted and ignored.
    BenchmarkSubmission,
}

impl InboundEvent {
    /// Decode an event from its JSON payload.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, error::EventError> {
        serde_json::from_slice(payload).map_err(|error| error::EventError::Malformed(error.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ResponseTrigger { .. } => "response-trigger",
            InboundEvent::MeaningLookup { .. } => "meaning-lookup",
            InboundEvent::KeepAlivePing { .. } => "keep-alive-ping",
            InboundEvent::BenchmarkSubmission => "benchmark-submission",
        }
    }
}

/// Hardware the generation backend runs on, reported in pongs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComputeMode {
    Cpu,
    #[default]
    Gpu,
}

impl std::fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeMode::Cpu => write!(f, "CPU"),
            ComputeMode::Gpu => write!(f, "GPU"),
        }
    }
}

impl std::str::FromStr for ComputeMode {
    type Err = error::ConfigError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CPU" => Ok(ComputeMode::Cpu),
            "GPU" => Ok(ComputeMode::Gpu),
            other => Err(error::ConfigError::Invalid(format!(
                "unknown compute mode '{other}', expected CPU or GPU"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_response_trigger() {
        let payload = r#"{
            "type": "response-trigger",
            "humanMessages": [
                {"user": "U1", "text": "hello", "ts": "1700000000.000100"},
                {"bot_id": "B1", "username": "りんな", "text": "hi"}
            ]
        }"#;

        let event = InboundEvent::decode(payload.as_bytes()).expect("payload should decode");
        let InboundEvent::ResponseTrigger { human_messages } = event else {
            panic!("expected response trigger, got {event:?}");
        };
        assert_eq!(human_messages.len(), 2);
        assert_eq!(human_messages[0].sender_id.as_deref(), Some("U1"));
        assert_eq!(human_messages[1].bot_username.as_deref(), Some("りんな"));
    }

    #[test]
    fn decodes_ping_and_benchmark() {
        let ping = InboundEvent::decode(br#"{"type":"keep-alive-ping","pingTopicId":"rinna-ping-1"}"#)
            .expect("ping should decode");
        assert_eq!(
            ping,
            InboundEvent::KeepAlivePing {
                ping_topic_id: "rinna-ping-1".into()
            }
        );

        let benchmark =
            InboundEvent::decode(br#"{"type":"benchmark-submission","id":"x","responses":[]}"#)
                .expect("benchmark should decode");
        assert_eq!(benchmark, InboundEvent::BenchmarkSubmission);
    }

    #[test]
    fn rejects_missing_fields() {
        let error = InboundEvent::decode(br#"{"type":"meaning-lookup"}"#)
            .expect_err("word is required");
        assert!(error.to_string().contains("malformed"));
    }

    #[test]
    fn parses_slack_timestamps() {
        let message = RawMessage {
            timestamp: Some("1700000000.000100".into()),
            ..Default::default()
        };
        let sent_at = message.sent_at().expect("timestamp should parse");
        assert_eq!(sent_at.timestamp(), 1_700_000_000);
        assert_eq!(sent_at.timestamp_subsec_micros(), 100);
        assert_eq!(message.thread_root(), Some("1700000000.000100"));
    }
}
