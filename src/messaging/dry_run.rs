//! Poster that logs instead of posting.

use crate::error::Result;
use crate::messaging::traits::{ChatPoster, OutgoingMessage, PostReceipt};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunPoster;

impl ChatPoster for DryRunPoster {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn post(&self, message: &OutgoingMessage) -> Result<PostReceipt> {
        tracing::info!(
            channel = %message.channel,
            username = %message.username,
            thread_ref = ?message.thread_ref,
            text = %message.text,
            "dry run: not posting"
        );

        Ok(PostReceipt {
            channel: message.channel.clone(),
            message_ref: None,
            raw: serde_json::json!({ "dry_run": true }),
        })
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ChatPosterDyn;

    #[tokio::test]
    async fn reports_dry_run_without_message_ref() {
        let poster: Box<dyn ChatPosterDyn> = Box::new(DryRunPoster);
        let message = OutgoingMessage {
            channel: "C1".into(),
            text: "こんにちは".into(),
            thread_ref: None,
            username: "りんな".into(),
            icon_url: String::new(),
        };

        let receipt = poster.post(&message).await.expect("dry run never fails");
        assert!(poster.is_dry_run());
        assert_eq!(receipt.channel, "C1");
        assert_eq!(receipt.message_ref, None);
        assert_eq!(receipt.raw["dry_run"], true);
    }
}
