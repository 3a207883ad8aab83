//! Sampling parameters sent with every generation request.

use serde::{Deserialize, Serialize};

/// Sampling configuration. Serialized verbatim into audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub do_sample: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub max_new_tokens: u32,
    /// Generation stops after any of these strings.
    pub stop: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            do_sample: true,
            temperature: 0.8,
            top_p: 1.0,
            repetition_penalty: 1.05,
            max_new_tokens: 128,
            stop: ["」", "！」", "？」", "?」", "。」", "…」", "……」"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SamplingConfig {
    /// JSON form recorded alongside each generation.
    pub fn to_audit_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
