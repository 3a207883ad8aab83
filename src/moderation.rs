//! Content safety checks run on every chunk before it is posted.

pub mod classifier;
pub mod gateway;
pub mod screener;

pub use classifier::{ClassifierVerdict, ContentClassifier, GoogleLanguageClassifier};
pub use gateway::{ModerationGateway, ModerationVerdict};
pub use screener::{AzureContentModerator, ScreenerVerdict, Term, TermScreener, has_offensive_term};
