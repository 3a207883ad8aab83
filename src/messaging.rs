//! Chat platform adapters (Slack, dry-run).

pub mod dry_run;
pub mod slack;
pub mod traits;

pub use dry_run::DryRunPoster;
pub use slack::SlackPoster;
pub use traits::{ChatPoster, ChatPosterDyn, OutgoingMessage, PostReceipt};
