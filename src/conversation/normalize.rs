//! Canonicalization of raw chat text before it enters a transcript.

use crate::error::ConfigError;
use crate::persona::PersonaSet;
use regex::Regex;

/// Fixed substitutions applied to every message.
const HONORIFICS: &[(&str, &str)] = &[("ワシ", "儂")];

/// Particles after which an alias is rewritten even mid-sentence.
const ALIAS_PARTICLES: &str = "はがのを";

struct AliasRule {
    prefix: Regex,
    suffix: Regex,
    before_particle: Regex,
    canonical: String,
}

/// Rewrites raw chat text into the form used inside prompts.
///
/// Steps run in a fixed order: persona mentions are stripped, bracket runs
/// and newlines collapse to a space, platform markup is dropped, fixed
/// substitutions apply, then informal aliases become in-text names when they
/// start or end the text or precede a particle. Infix aliases are left alone
/// so ordinary words that contain an alias survive (`こうないえん`).
pub struct TextNormalizer {
    mentions: Vec<String>,
    brackets: Regex,
    markup: Regex,
    substitutions: Vec<(String, String)>,
    aliases: Vec<AliasRule>,
}

impl TextNormalizer {
    pub fn new(personas: &PersonaSet) -> Result<Self, ConfigError> {
        let mentions = personas
            .iter()
            .map(|persona| format!("@{}", persona.alias()))
            .collect();

        let substitutions = HONORIFICS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .chain(
                personas
                    .iter()
                    .filter(|persona| persona.platform_display_name != persona.display_name_in_text)
                    .map(|persona| {
                        (
                            persona.platform_display_name.clone(),
                            persona.display_name_in_text.clone(),
                        )
                    }),
            )
            .collect();

        let aliases = personas
            .iter()
            .filter(|persona| persona.alias() != persona.display_name_in_text)
            .map(|persona| {
                let alias = regex::escape(persona.alias());
                Ok(AliasRule {
                    prefix: compile(&format!("^{alias}"))?,
                    suffix: compile(&format!("{alias}$"))?,
                    before_particle: compile(&format!("{alias}([{ALIAS_PARTICLES}])"))?,
                    canonical: persona.display_name_in_text.clone(),
                })
            })
            .collect::<Result<_, ConfigError>>()?;

        Ok(Self {
            mentions,
            brackets: compile(r"[\p{Ps}\p{Pe}\r\n]+")?,
            markup: compile(r"<.+?>")?,
            substitutions,
            aliases,
        })
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut text = text.to_string();

        for mention in &self.mentions {
            text = text.replace(mention.as_str(), "");
        }

        text = self.brackets.replace_all(&text, " ").into_owned();
        text = self.markup.replace_all(&text, "").into_owned();

        for (from, to) in &self.substitutions {
            text = text.replace(from.as_str(), to);
        }

        for rule in &self.aliases {
            let canonical = rule.canonical.as_str();
            text = rule.prefix.replace(&text, canonical).into_owned();
            text = rule.suffix.replace(&text, canonical).into_owned();
            text = rule
                .before_particle
                .replace_all(&text, format!("{canonical}${{1}}").as_str())
                .into_owned();
        }

        text.trim().to_string()
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern)
        .map_err(|error| ConfigError::Invalid(format!("invalid normalizer pattern {pattern}: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{PersonaSet, default_personas, default_themed_groups};

    fn normalizer() -> TextNormalizer {
        let personas =
            PersonaSet::new(default_personas(), default_themed_groups()).expect("defaults are valid");
        TextNormalizer::new(&personas).expect("normalizer should build")
    }

    #[test]
    fn strips_mentions_and_substitutes_names() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("@りんな hello"), "hello");
        assert_eq!(normalizer.normalize("ワシ"), "儂");
        assert_eq!(normalizer.normalize("今言うな"), "ウナ");
        assert_eq!(normalizer.normalize("皿洗うか"), "ウカ");
        assert_eq!(normalizer.normalize("皿洗うの"), "ウノ");
        assert_eq!(normalizer.normalize("三脚たたも"), "タタモ");
    }

    #[test]
    fn rewrites_aliases_at_edges_and_before_particles() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("うな"), "ウナ");
        assert_eq!(normalizer.normalize("うなは"), "ウナは");
        assert_eq!(normalizer.normalize("うなが"), "ウナが");
        assert_eq!(normalizer.normalize("うなの"), "ウナの");
        assert_eq!(normalizer.normalize("うなを"), "ウナを");
        assert_eq!(normalizer.normalize("hello うな"), "hello ウナ");
        assert_eq!(normalizer.normalize("hello うなは"), "hello ウナは");
        assert_eq!(normalizer.normalize("hello うなを"), "hello ウナを");
    }

    #[test]
    fn leaves_infix_aliases_alone() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("hello うな hello"), "hello うな hello");
        assert_eq!(normalizer.normalize("こうないえん"), "こうないえん");
    }

    #[test]
    fn collapses_brackets_and_drops_markup() {
        let normalizer = normalizer();
        assert_eq!(
            normalizer.normalize("<@U123> 「すごい」って\n言った"),
            "すごい って 言った"
        );
        assert_eq!(normalizer.normalize("（（笑））"), "笑");
    }

    #[test]
    fn is_idempotent() {
        let normalizer = normalizer();
        for input in ["うなは元気", "hello うな", "<@U1>「皿洗うか」\r\nって", "こうないえん"] {
            let once = normalizer.normalize(input);
            assert_eq!(normalizer.normalize(&once), once, "input: {input}");
        }
    }
}
