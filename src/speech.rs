//! Turning raw completions into postable utterances.

pub mod chunk;
pub mod postprocess;

pub use chunk::{split_into_chunks, strip_single_trailing_period};
pub use postprocess::SpeechPostProcessor;
