//! Persona profiles and the ordered persona set.

use crate::PersonaId;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Static configuration for one conversational character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    /// Persona id. Doubles as the informal alias used in chat (`うな`).
    pub id: PersonaId,
    /// Prompt preamble for the dialogue path.
    pub intro_template: String,
    /// Prompt preamble for direct question answering.
    #[serde(default)]
    pub inquiry_intro_template: Option<String>,
    /// Prompt preamble for word definitions.
    #[serde(default)]
    pub meaning_intro_template: Option<String>,
    /// Name used for this persona inside transcripts (`ウナ`).
    pub display_name_in_text: String,
    /// Name shown on the chat platform (`今言うな`).
    pub platform_display_name: String,
    pub platform_icon_url: String,
    /// Speaks with the archaic first-person pronoun (`儂`).
    #[serde(default)]
    pub archaic_pronoun: bool,
}

impl CharacterProfile {
    /// The informal alias people type in chat.
    pub fn alias(&self) -> &str {
        &self.id
    }

    pub fn has_inquiry_mode(&self) -> bool {
        self.inquiry_intro_template.is_some()
    }

    pub fn has_meaning_mode(&self) -> bool {
        self.meaning_intro_template.is_some()
    }
}

/// A keyword that narrows the random fallback to a subset of personas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemedGroup {
    pub keyword: String,
    pub members: Vec<PersonaId>,
}

/// All personas, in trigger-scan order.
#[derive(Debug, Clone)]
pub struct PersonaSet {
    personas: Vec<CharacterProfile>,
    themed_groups: Vec<ThemedGroup>,
}

impl PersonaSet {
    /// Build a persona set, rejecting duplicate ids and dangling group members.
    pub fn new(
        personas: Vec<CharacterProfile>,
        themed_groups: Vec<ThemedGroup>,
    ) -> Result<Self, ConfigError> {
        if personas.is_empty() {
            return Err(ConfigError::Invalid("at least one persona is required".into()));
        }

        let mut seen = HashSet::new();
        for persona in &personas {
            if persona.id.is_empty() {
                return Err(ConfigError::Invalid("persona id must not be empty".into()));
            }
            if !seen.insert(persona.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate persona id '{}'",
                    persona.id
                )));
            }
        }

        for group in &themed_groups {
            if group.members.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "themed group '{}' has no members",
                    group.keyword
                )));
            }
            if let Some(unknown) = group.members.iter().find(|id| !seen.contains(id.as_str())) {
                return Err(ConfigError::UnknownPersona(unknown.clone()));
            }
        }

        Ok(Self {
            personas,
            themed_groups,
        })
    }

    pub fn get(&self, id: &str) -> Option<&CharacterProfile> {
        self.personas.iter().find(|persona| persona.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterProfile> {
        self.personas.iter()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Personas whose alias appears in the trigger text, in scan order.
    pub fn triggered_by(&self, trigger_text: &str) -> Vec<&CharacterProfile> {
        self.personas
            .iter()
            .filter(|persona| trigger_text.contains(persona.alias()))
            .collect()
    }

    /// Candidates for the random fallback: the first themed group whose
    /// keyword appears in the text, otherwise every persona.
    pub fn fallback_pool(&self, trigger_text: &str) -> Vec<&CharacterProfile> {
        let group = self
            .themed_groups
            .iter()
            .find(|group| trigger_text.contains(&group.keyword));

        match group {
            Some(group) => group
                .members
                .iter()
                .filter_map(|id| self.get(id))
                .collect(),
            None => self.personas.iter().collect(),
        }
    }

    /// The persona that answers definition requests.
    pub fn meaning_persona(&self) -> Option<&CharacterProfile> {
        self.personas.iter().find(|persona| persona.has_meaning_mode())
    }

    /// Detect `<name>、『word』ってわかる？` addressed to a persona that can
    /// explain words. Returns the persona and the requested word.
    pub fn definition_request<'a>(
        &self,
        trigger_text: &'a str,
    ) -> Option<(&CharacterProfile, &'a str)> {
        self.personas
            .iter()
            .filter(|persona| persona.has_meaning_mode())
            .find_map(|persona| {
                parse_definition_request(trigger_text, persona).map(|word| (persona, word))
            })
    }
}

fn parse_definition_request<'a>(text: &'a str, persona: &CharacterProfile) -> Option<&'a str> {
    let text = text.trim();
    let text = text.strip_prefix('@').unwrap_or(text);

    let rest = [persona.alias(), persona.display_name_in_text.as_str()]
        .into_iter()
        .find_map(|name| text.strip_prefix(name))?;
    let rest = rest.trim_start_matches(['、', ',', '，', ' ', '　']);

    let rest = rest
        .strip_suffix('？')
        .or_else(|| rest.strip_suffix('?'))
        .unwrap_or(rest);
    let quoted = rest.strip_suffix("ってわかる")?;

    let word = [('『', '』'), ('「', '」')]
        .into_iter()
        .find_map(|(open, close)| quoted.strip_prefix(open)?.strip_suffix(close))?;

    (!word.trim().is_empty()).then_some(word.trim())
}

const DIALOGUE_INTRO_TAIL: &str = "今日は[MONTH]月[DATE]日[WEEKDAY]曜日、[HOUR]時[MINUTE]分。天気は[WEATHER]。";

/// The built-in cast.
pub fn default_personas() -> Vec<CharacterProfile> {
    vec![
        CharacterProfile {
            id: "りんな".into(),
            intro_template: format!(
                "りんなは明るくておしゃべりな女子高生です。以下はSlackでのりんなとみんなの会話です。{DIALOGUE_INTRO_TAIL}"
            ),
            inquiry_intro_template: Some(
                "りんなは物知りな女子高生です。以下は質問とりんなの回答です。".into(),
            ),
            meaning_intro_template: None,
            display_name_in_text: "りんな".into(),
            platform_display_name: "りんな".into(),
            platform_icon_url: "https://huggingface.co/rinna/japanese-gpt-1b/resolve/main/rinna.png"
                .into(),
            archaic_pronoun: false,
        },
        CharacterProfile {
            id: "うな".into(),
            intro_template: format!(
                "ウナは少し生意気な中学生の女の子です。以下はSlackでのウナとみんなの会話です。{DIALOGUE_INTRO_TAIL}"
            ),
            inquiry_intro_template: Some(
                "ウナは何でも知っている中学生です。以下は質問とウナの回答です。".into(),
            ),
            meaning_intro_template: Some(
                "ウナは言葉の意味をわかりやすく説明するのが得意です。以下はひでおとウナの会話です。"
                    .into(),
            ),
            display_name_in_text: "ウナ".into(),
            platform_display_name: "今言うな".into(),
            platform_icon_url:
                "https://hakata-public.s3.ap-northeast-1.amazonaws.com/slackbot/una_icon.png".into(),
            archaic_pronoun: false,
        },
        CharacterProfile {
            id: "うか".into(),
            intro_template: format!(
                "ウカは皿洗いが得意な双子の姉です。以下はSlackでのウカとみんなの会話です。{DIALOGUE_INTRO_TAIL}"
            ),
            inquiry_intro_template: None,
            meaning_intro_template: None,
            display_name_in_text: "ウカ".into(),
            platform_display_name: "皿洗うか".into(),
            platform_icon_url:
                "https://hakata-public.s3.ap-northeast-1.amazonaws.com/slackbot/uka_icon_edit.png"
                    .into(),
            archaic_pronoun: false,
        },
        CharacterProfile {
            id: "うの".into(),
            intro_template: format!(
                "ウノは皿洗いが得意な双子の妹です。以下はSlackでのウノとみんなの会話です。{DIALOGUE_INTRO_TAIL}"
            ),
            inquiry_intro_template: None,
            meaning_intro_template: None,
            display_name_in_text: "ウノ".into(),
            platform_display_name: "皿洗うの".into(),
            platform_icon_url:
                "https://hakata-public.s3.ap-northeast-1.amazonaws.com/slackbot/uno_icon.png".into(),
            archaic_pronoun: false,
        },
        CharacterProfile {
            id: "たたも".into(),
            intro_template: format!(
                "タタモは三脚をたたむのが趣味のおじいさんで、自分のことを儂と呼びます。以下はSlackでのタタモとみんなの会話です。{DIALOGUE_INTRO_TAIL}"
            ),
            inquiry_intro_template: None,
            meaning_intro_template: None,
            display_name_in_text: "タタモ".into(),
            platform_display_name: "三脚たたも".into(),
            platform_icon_url:
                "https://hakata-public.s3.ap-northeast-1.amazonaws.com/slackbot/user03.png".into(),
            archaic_pronoun: true,
        },
    ]
}

/// The built-in themed groups.
pub fn default_themed_groups() -> Vec<ThemedGroup> {
    vec![ThemedGroup {
        keyword: "皿洗".into(),
        members: vec!["うか".into(), "うの".into()],
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast() -> PersonaSet {
        PersonaSet::new(default_personas(), default_themed_groups()).expect("defaults are valid")
    }

    #[test]
    fn triggers_follow_scan_order() {
        let personas = cast();
        let triggered: Vec<&str> = personas
            .triggered_by("うのとりんなはどう思う？")
            .into_iter()
            .map(|persona| persona.id.as_str())
            .collect();

        assert_eq!(triggered, vec!["りんな", "うの"]);
    }

    #[test]
    fn themed_keyword_narrows_fallback() {
        let personas = cast();
        let pool: Vec<&str> = personas
            .fallback_pool("皿洗いしなきゃ")
            .into_iter()
            .map(|persona| persona.id.as_str())
            .collect();
        assert_eq!(pool, vec!["うか", "うの"]);

        assert_eq!(personas.fallback_pool("おはよう").len(), personas.len());
    }

    #[test]
    fn capabilities_are_explicit() {
        let personas = cast();
        let una = personas.get("うな").expect("うな exists");
        assert!(una.has_inquiry_mode());
        assert!(una.has_meaning_mode());

        let uka = personas.get("うか").expect("うか exists");
        assert!(!uka.has_inquiry_mode());
        assert_eq!(personas.meaning_persona().map(|p| p.id.as_str()), Some("うな"));
    }

    #[test]
    fn detects_definition_requests() {
        let personas = cast();

        let (persona, word) = personas
            .definition_request("うな、『エモい』ってわかる？")
            .expect("should be a definition request");
        assert_eq!(persona.id, "うな");
        assert_eq!(word, "エモい");

        let (_, word) = personas
            .definition_request("@ウナ 「ぴえん」ってわかる?")
            .expect("should accept in-text name and ascii question mark");
        assert_eq!(word, "ぴえん");

        assert!(personas.definition_request("うな、元気？").is_none());
        assert!(personas.definition_request("りんな、『エモい』ってわかる？").is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut personas = default_personas();
        personas.push(personas[0].clone());
        let error = PersonaSet::new(personas, Vec::new()).expect_err("duplicates must fail");
        assert!(error.to_string().contains("duplicate persona id"));
    }

    #[test]
    fn rejects_unknown_group_members() {
        let groups = vec![ThemedGroup {
            keyword: "x".into(),
            members: vec!["だれ".into()],
        }];
        let error = PersonaSet::new(default_personas(), groups).expect_err("unknown member");
        assert!(matches!(error, ConfigError::UnknownPersona(id) if id == "だれ"));
    }
}
