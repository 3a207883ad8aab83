//! Top-level error types for rinnabot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Moderation(#[from] ModerationError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("event worker is not running")]
    WorkerStopped,

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Truncate provider error bodies before they land in errors and logs.
pub(crate) fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(512) {
        Some((index, _)) => format!("{}…", &body[..index]),
        None => body.to_string(),
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config from {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("unknown persona: {0}")]
    UnknownPersona(String),
}

/// Text generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
}

/// Content moderation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("{provider} request failed: {message}")]
    Request { provider: &'static str, message: String },

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("unexpected {provider} response: {message}")]
    InvalidResponse { provider: &'static str, message: String },
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("failed to post message: {0}")]
    PostFailed(String),

    #[error("failed to publish to {topic}: {message}")]
    PublishFailed { topic: String, message: String },
}

/// Audit persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to encode audit field {field}: {source}")]
    Encode {
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to decode audit field {field}: {source}")]
    Decode {
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to write audit record: {0}")]
    Write(#[from] sqlx::Error),
}

/// Inbound event decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(String),

    #[error("event has no human messages")]
    EmptyTrigger,

    #[error("invalid ping topic id: {0}")]
    InvalidPingTopic(String),
}
