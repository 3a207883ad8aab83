//! Cleanup of raw model output into a persona's speech.

use crate::persona::{CharacterProfile, PersonaSet};

const UNKNOWN_TOKENS: &[&str] = &["[UNK]", "<unk>"];

/// Glyph pairs folded onto the canonical `「」`.
const QUOTE_GLYPHS: &[(char, char)] = &[('『', '「'), ('』', '」')];

const ARCHAIC_PRONOUN: (&str, &str) = ("ワシ", "儂");

/// Cleans a completion into the text a persona posts.
///
/// The output is stable under re-application: running it over its own
/// result changes nothing.
#[derive(Debug, Clone)]
pub struct SpeechPostProcessor {
    /// In-text name to casual chat spelling (`ウナ` to `うな`).
    renames: Vec<(String, String)>,
}

impl SpeechPostProcessor {
    pub fn new(personas: &PersonaSet) -> Self {
        let renames = personas
            .iter()
            .filter(|persona| persona.display_name_in_text != persona.alias())
            .map(|persona| {
                (
                    persona.display_name_in_text.clone(),
                    persona.alias().to_string(),
                )
            })
            .collect();

        Self { renames }
    }

    pub fn process(&self, raw_output: &str, persona: &CharacterProfile) -> String {
        let quoted: String = raw_output
            .chars()
            .map(|c| {
                QUOTE_GLYPHS
                    .iter()
                    .find(|(from, _)| *from == c)
                    .map_or(c, |(_, to)| *to)
            })
            .collect();

        let mut speech = truncate_at_closing_quote(&quoted).to_string();

        while let Some(token) = UNKNOWN_TOKENS.iter().find(|token| speech.contains(**token)) {
            speech = speech.replace(token, "");
        }

        for (from, to) in &self.renames {
            speech = speech.replace(from.as_str(), to);
        }

        if persona.archaic_pronoun {
            speech = speech.replace(ARCHAIC_PRONOUN.0, ARCHAIC_PRONOUN.1);
        }

        speech
    }
}

/// Cut at the first `」` that closes the persona's own utterance, keeping
/// quotes the persona opened itself.
fn truncate_at_closing_quote(text: &str) -> &str {
    let mut depth = 0usize;
    for (index, c) in text.char_indices() {
        match c {
            '「' => depth += 1,
            '」' if depth == 0 => return &text[..index],
            '」' => depth -= 1,
            _ => {}
        }
    }
    text
}
