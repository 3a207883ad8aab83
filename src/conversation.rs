//! Dialogue history: normalization, speaker resolution, prompt assembly.

pub mod normalize;
pub mod prompt;
pub mod speaker;

pub use normalize::TextNormalizer;
pub use prompt::{
    BudgetOutcome, FormattedTurn, MeaningPrompt, PlaceholderValues, PromptBuilder, PromptCandidate,
    TokenBudgetTrimmer, TurnKind,
};
pub use speaker::UserResolver;
