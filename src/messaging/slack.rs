//! Slack poster: `chat.postMessage` under a persona's name and icon.

use crate::error::{MessagingError, Result};
use crate::messaging::traits::{ChatPoster, OutgoingMessage, PostReceipt};

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::sync::Arc;

/// Slack adapter.
pub struct SlackPoster {
    /// Shared HTTP client, constructed once and reused for every post.
    client: Arc<SlackHyperClient>,
    /// Pre-built API token wrapping the bot token.
    token: SlackApiToken,
}

impl SlackPoster {
    pub fn new(bot_token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));
        Ok(Self { client, token })
    }

    /// Open a session against the cached client using the cached bot token.
    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }
}

impl ChatPoster for SlackPoster {
    fn name(&self) -> &str {
        "slack"
    }

    async fn post(&self, message: &OutgoingMessage) -> Result<PostReceipt> {
        let request = build_request(message);
        let response = self
            .session()
            .chat_post_message(&request)
            .await
            .map_err(|error| MessagingError::PostFailed(error.to_string()))?;

        tracing::debug!(
            channel = %response.channel.0,
            ts = %response.ts.0,
            username = %message.username,
            "posted slack message"
        );

        let raw = serde_json::to_value(&response).unwrap_or_else(|_| {
            serde_json::json!({
                "channel": response.channel.0,
                "ts": response.ts.0,
            })
        });

        Ok(PostReceipt {
            channel: response.channel.0.clone(),
            message_ref: Some(response.ts.0.clone()),
            raw,
        })
    }
}

fn build_request(message: &OutgoingMessage) -> SlackApiChatPostMessageRequest {
    SlackApiChatPostMessageRequest::new(
        SlackChannelId(message.channel.clone()),
        SlackMessageContent::new().with_text(message.text.clone()),
    )
    .with_username(message.username.clone())
    .with_icon_url(message.icon_url.clone())
    .opt_thread_ts(message.thread_ref.clone().map(SlackTs))
}
