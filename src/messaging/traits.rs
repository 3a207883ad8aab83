//! Chat poster trait and dynamic dispatch companion.

use crate::error::Result;
use std::pin::Pin;

/// One chunk to post, with the persona identity it is posted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel: String,
    pub text: String,
    /// Reply thread, or `None` to post in the channel.
    pub thread_ref: Option<String>,
    pub username: String,
    pub icon_url: String,
}

/// What the platform returned for a post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostReceipt {
    pub channel: String,
    /// Platform message id (`ts` on Slack). `None` when nothing was posted.
    pub message_ref: Option<String>,
    /// Platform response, retained for auditing.
    pub raw: serde_json::Value,
}

/// Static trait for chat posters.
/// Use this for type-safe implementations.
pub trait ChatPoster: Send + Sync + 'static {
    /// Unique name for this poster.
    fn name(&self) -> &str;

    /// Post one message.
    fn post(
        &self,
        message: &OutgoingMessage,
    ) -> impl std::future::Future<Output = Result<PostReceipt>> + Send;

    /// Whether posts are only logged.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ChatPosterDyn>` to pick a poster at startup.
pub trait ChatPosterDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn post<'a>(
        &'a self,
        message: &'a OutgoingMessage,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<PostReceipt>> + Send + 'a>>;

    fn is_dry_run(&self) -> bool;
}

/// Blanket implementation: any type implementing ChatPoster automatically implements ChatPosterDyn.
impl<T: ChatPoster> ChatPosterDyn for T {
    fn name(&self) -> &str {
        ChatPoster::name(self)
    }

    fn post<'a>(
        &'a self,
        message: &'a OutgoingMessage,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<PostReceipt>> + Send + 'a>> {
        Box::pin(ChatPoster::post(self, message))
    }

    fn is_dry_run(&self) -> bool {
        ChatPoster::is_dry_run(self)
    }
}
