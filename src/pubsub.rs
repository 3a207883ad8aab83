//! Pub/Sub plumbing: the push endpoint that feeds the worker, and pong
//! publishing for keep-alive pings.

use crate::ComputeMode;
use crate::agent::WorkerHandle;
use crate::error::{EventError, MessagingError, Result};

use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

const PUBSUB_API: &str = "https://pubsub.googleapis.com/v1";

/// Push delivery body sent by a Pub/Sub push subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded event JSON.
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl PushEnvelope {
    pub fn parse(body: &[u8]) -> std::result::Result<Self, EventError> {
        serde_json::from_slice(body).map_err(|error| EventError::Malformed(error.to_string()))
    }

    /// The decoded event payload.
    pub fn payload(&self) -> std::result::Result<Vec<u8>, EventError> {
        base64::engine::general_purpose::STANDARD
            .decode(self.message.data.trim())
            .map_err(|error| EventError::Malformed(format!("invalid base64 data: {error}")))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Start the push endpoint on the given address.
///
/// Every delivery is acknowledged with `204` once the worker has handled it,
/// including deliveries that fail to decode.
pub async fn start_push_server(
    bind: SocketAddr,
    worker: WorkerHandle,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/pubsub/push", post(push))
        .with_state(worker);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind push endpoint on {bind}"))?;
    tracing::info!(%bind, "push endpoint listening");

    let handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            tracing::error!(%error, "push endpoint exited with error");
        }
    });

    Ok(handle)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn push(State(worker): State<WorkerHandle>, body: Bytes) -> StatusCode {
    let envelope = match PushEnvelope::parse(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, "dropping undecodable push delivery");
            return StatusCode::NO_CONTENT;
        }
    };

    let message_id = envelope.message.message_id.clone().unwrap_or_default();
    let payload = match envelope.payload() {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(%message_id, %error, "dropping push delivery with bad data");
            return StatusCode::NO_CONTENT;
        }
    };

    tracing::debug!(%message_id, subscription = ?envelope.subscription, "push delivery received");
    if let Err(error) = worker.enqueue(payload).await {
        tracing::error!(%message_id, %error, "failed to hand delivery to worker");
    }

    StatusCode::NO_CONTENT
}

/// Millisecond timestamp embedded as the last `-` segment of a ping topic id.
pub fn ping_timestamp(ping_topic_id: &str) -> std::result::Result<i64, EventError> {
    ping_topic_id
        .rsplit('-')
        .next()
        .and_then(|segment| segment.parse().ok())
        .ok_or_else(|| EventError::InvalidPingTopic(ping_topic_id.to_string()))
}

/// Topic a pong is published to: the ping topic with its first `ping`
/// segment replaced by `pong`.
pub fn pong_topic(ping_topic_id: &str) -> std::result::Result<String, EventError> {
    let mut replaced = false;
    let segments: Vec<&str> = ping_topic_id
        .split('-')
        .map(|segment| {
            if !replaced && segment == "ping" {
                replaced = true;
                "pong"
            } else {
                segment
            }
        })
        .collect();

    if replaced {
        Ok(segments.join("-"))
    } else {
        Err(EventError::InvalidPingTopic(ping_topic_id.to_string()))
    }
}

/// Reply to a keep-alive ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "pong", rename_all = "camelCase")]
pub struct Pong {
    pub ping_topic_id: String,
    pub mode: ComputeMode,
}

#[async_trait::async_trait]
pub trait PongPublisher: Send + Sync {
    async fn publish(&self, topic: &str, pong: &Pong) -> Result<()>;
}

/// Publishes through the Pub/Sub REST API with a bearer token.
pub struct HttpPongPublisher {
    project_id: String,
    access_token: String,
    http_client: reqwest::Client,
}

impl HttpPongPublisher {
    pub fn new(
        project_id: impl Into<String>,
        access_token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            project_id: project_id.into(),
            access_token: access_token.into(),
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl PongPublisher for HttpPongPublisher {
    async fn publish(&self, topic: &str, pong: &Pong) -> Result<()> {
        let url = format!(
            "{PUBSUB_API}/projects/{}/topics/{topic}:publish",
            self.project_id
        );
        let publish_failed = |message: String| MessagingError::PublishFailed {
            topic: topic.to_string(),
            message,
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&publish_body(pong)?)
            .send()
            .await
            .map_err(|error| publish_failed(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(publish_failed(format!("status {status}: {body}")).into());
        }

        tracing::info!(%topic, mode = %pong.mode, "published pong");
        Ok(())
    }
}

fn publish_body(pong: &Pong) -> Result<serde_json::Value> {
    let data = serde_json::to_vec(pong).context("failed to serialize pong")?;
    Ok(serde_json::json!({
        "messages": [{ "data": base64::engine::general_purpose::STANDARD.encode(data) }],
    }))
}

/// Logs pongs without publishing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPongPublisher;

#[async_trait::async_trait]
impl PongPublisher for LoggingPongPublisher {
    async fn publish(&self, topic: &str, pong: &Pong) -> Result<()> {
        tracing::info!(%topic, mode = %pong.mode, "dry run: not publishing pong");
        Ok(())
    }
}
