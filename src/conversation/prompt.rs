//! Prompt assembly and token-budget windowing.

use crate::RawMessage;
use crate::conversation::{TextNormalizer, UserResolver};
use crate::error::Result;
use crate::llm::{TextGenerationService, TokenIds};
use crate::persona::CharacterProfile;
use chrono::{DateTime, Datelike as _, TimeZone, Timelike as _};
use regex::Regex;
use std::sync::LazyLock;

/// A turn ending in one of these merges with the next by a plain space.
const MERGE_TERMINALS: &[char] = &['!', '?', '！', '？', '。', '｡', '、', '､'];

const WEEKDAYS: [char; 7] = ['月', '火', '水', '木', '金', '土', '日'];

static CONTEXT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((.+?)\)(.+)$").expect("hardcoded regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Speech,
    /// Scene-setting note, rendered in parentheses and never merged.
    Context,
}

/// One rendered line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedTurn {
    pub speaker: String,
    pub text: String,
    pub kind: TurnKind,
}

impl FormattedTurn {
    pub fn speech(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            kind: TurnKind::Speech,
        }
    }

    pub fn context(text: impl Into<String>) -> Self {
        Self {
            speaker: String::new(),
            text: text.into(),
            kind: TurnKind::Context,
        }
    }

    pub fn render(&self) -> String {
        match self.kind {
            TurnKind::Speech => format!("{}「{}」", self.speaker, self.text),
            TurnKind::Context => format!("({})", self.text),
        }
    }
}

/// Values substituted into intro templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderValues {
    pub month: u32,
    pub date: u32,
    pub weekday: char,
    pub hour: String,
    pub minute: u32,
    pub weather: String,
}

impl PlaceholderValues {
    /// Placeholder values for a wall-clock instant in the persona's time zone.
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>, weather: impl Into<String>) -> Self {
        let hour = now.hour();
        let hour = if hour <= 12 {
            format!("午前{hour}")
        } else {
            format!("午後{}", hour - 12)
        };

        Self {
            month: now.month(),
            date: now.day(),
            weekday: WEEKDAYS[now.weekday().num_days_from_monday() as usize],
            hour,
            minute: now.minute(),
            weather: weather.into(),
        }
    }

    pub fn apply(&self, template: &str) -> String {
        template
            .replace("[MONTH]", &self.month.to_string())
            .replace("[DATE]", &self.date.to_string())
            .replace("[WEEKDAY]", &self.weekday.to_string())
            .replace("[HOUR]", &self.hour)
            .replace("[MINUTE]", &self.minute.to_string())
            .replace("[WEATHER]", &self.weather)
    }
}

/// A prompt measured against the backend tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCandidate {
    pub text: String,
    /// The transcript portion of the prompt, kept for auditing.
    pub dialogue_rendering: String,
    pub token_ids: TokenIds,
    pub token_length: usize,
}

impl PromptCandidate {
    pub async fn measure(
        service: &dyn TextGenerationService,
        text: String,
        dialogue_rendering: String,
    ) -> Result<Self> {
        let token_ids = service.encode(&text).await?;
        Ok(Self {
            token_length: token_ids.len(),
            text,
            dialogue_rendering,
            token_ids,
        })
    }
}

/// Builds dialogue, inquiry and definition prompts for a persona.
pub struct PromptBuilder {
    normalizer: TextNormalizer,
    resolver: UserResolver,
    meaning_asker: String,
}

impl PromptBuilder {
    pub fn new(
        normalizer: TextNormalizer,
        resolver: UserResolver,
        meaning_asker: impl Into<String>,
    ) -> Self {
        Self {
            normalizer,
            resolver,
            meaning_asker: meaning_asker.into(),
        }
    }

    /// Normalize messages and merge consecutive turns from the same speaker.
    ///
    /// Messages without text, or whose text normalizes to nothing, are
    /// skipped. A leading `(note)` becomes a separate context turn.
    pub fn format_turns(&self, messages: &[RawMessage]) -> Vec<FormattedTurn> {
        let mut turns: Vec<FormattedTurn> = Vec::new();

        for message in messages {
            let Some(raw_text) = message.text.as_deref() else {
                continue;
            };

            let mut body = raw_text;
            if let Some(captures) = CONTEXT_PREFIX.captures(raw_text)
                && let (Some(context), Some(rest)) = (captures.get(1), captures.get(2))
            {
                let context = self.normalizer.normalize(context.as_str());
                tracing::debug!(%context, "context found");
                turns.push(FormattedTurn::context(context));
                body = rest.as_str().trim();
            }

            let text = self.normalizer.normalize(body);
            if text.is_empty() {
                continue;
            }

            let speaker = self.resolver.resolve(message);
            match turns.last_mut() {
                Some(last) if last.kind == TurnKind::Speech && last.speaker == speaker => {
                    let separator = if last.text.ends_with(MERGE_TERMINALS) {
                        ' '
                    } else {
                        '。'
                    };
                    last.text.push(separator);
                    last.text.push_str(&text);
                }
                _ => turns.push(FormattedTurn::speech(speaker, text)),
            }
        }

        turns
    }

    pub fn render_dialogue(turns: &[FormattedTurn]) -> String {
        turns
            .iter()
            .map(FormattedTurn::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full dialogue prompt ending in an open quote for the persona.
    pub fn dialogue_prompt(
        &self,
        persona: &CharacterProfile,
        dialogue: &str,
        placeholders: &PlaceholderValues,
    ) -> String {
        let prompt = format!(
            "{}\n\n{dialogue}\n{}「",
            persona.intro_template, persona.display_name_in_text
        );
        placeholders.apply(&prompt)
    }

    /// Single-turn question prompt, when the trigger is a question and the
    /// persona supports direct answers.
    pub fn inquiry_prompt(
        &self,
        persona: &CharacterProfile,
        messages: &[RawMessage],
    ) -> Option<(String, String)> {
        let intro = persona.inquiry_intro_template.as_deref()?;
        let question = messages.last()?.text.as_deref().unwrap_or_default();
        if !question.ends_with(['？', '?']) {
            return None;
        }

        let dialogue = format!("質問「{question}」");
        Some((format!("{intro}\n{dialogue}\n回答「"), dialogue))
    }

    /// Prompt asking the persona what a word means. The completion continues
    /// the returned lead-in.
    pub fn meaning_prompt(&self, persona: &CharacterProfile, word: &str) -> Option<MeaningPrompt> {
        let intro = persona.meaning_intro_template.as_deref()?;
        let name = &persona.display_name_in_text;

        let question = format!("{}「{name}、『{word}』ってわかる？」", self.meaning_asker);
        let lead_in = format!("『{word}』っていうのは、");

        Some(MeaningPrompt {
            text: format!("{intro}\n{question}\n{name}「{lead_in}"),
            dialogue: question,
            lead_in,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeaningPrompt {
    pub text: String,
    pub dialogue: String,
    pub lead_in: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetOutcome {
    /// The widest window under the ceiling.
    Fits(PromptCandidate),
    /// Even the newest turn alone is over the ceiling. Carries that candidate
    /// for diagnostics; it must not be sent.
    Overflow(PromptCandidate),
    /// Nothing to render.
    NoTurns,
}

/// Grows the dialogue window from the newest turn backwards until the next
/// candidate would exceed the token ceiling.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudgetTrimmer {
    ceiling: usize,
}

impl TokenBudgetTrimmer {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub async fn select(
        &self,
        service: &dyn TextGenerationService,
        builder: &PromptBuilder,
        persona: &CharacterProfile,
        turns: &[FormattedTurn],
        placeholders: &PlaceholderValues,
    ) -> Result<BudgetOutcome> {
        let mut selected = None;
        let mut narrowest = None;

        for start in (0..turns.len()).rev() {
            let dialogue = PromptBuilder::render_dialogue(&turns[start..]);
            let text = builder.dialogue_prompt(persona, &dialogue, placeholders);
            let candidate = PromptCandidate::measure(service, text, dialogue).await?;

            tracing::debug!(
                persona = %persona.id,
                window = turns.len() - start,
                input_len = candidate.token_length,
                "measured prompt window"
            );

            if candidate.token_length > self.ceiling {
                if selected.is_none() {
                    narrowest = Some(candidate);
                }
                break;
            }
            selected = Some(candidate);
        }

        Ok(match (selected, narrowest) {
            (Some(candidate), _) => BudgetOutcome::Fits(candidate),
            (None, Some(candidate)) => BudgetOutcome::Overflow(candidate),
            (None, None) => BudgetOutcome::NoTurns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ComputeMode;
    use crate::llm::SamplingConfig;
    use crate::persona::{PersonaSet, default_personas, default_themed_groups};
    use chrono::{Timelike, Utc};
    use std::collections::HashMap;

    /// One token per character.
    struct CharTokenizer;

    #[async_trait::async_trait]
    impl TextGenerationService for CharTokenizer {
        async fn encode(&self, text: &str) -> Result<TokenIds> {
            Ok(text.chars().map(|c| c as u32).collect())
        }

        async fn generate(&self, _: &[u32], _: &SamplingConfig) -> Result<String> {
            Ok(String::new())
        }

        fn compute_mode(&self) -> ComputeMode {
            ComputeMode::Cpu
        }
    }

    fn builder() -> PromptBuilder {
        let personas =
            PersonaSet::new(default_personas(), default_themed_groups()).expect("defaults are valid");
        let normalizer = TextNormalizer::new(&personas).expect("normalizer should build");
        let aliases = HashMap::from([("U1".to_string(), "博多市".to_string())]);
        let resolver = UserResolver::new("BEHP604TV", &personas, aliases);
        PromptBuilder::new(normalizer, resolver, "ひでお")
    }

    fn plain_persona() -> CharacterProfile {
        CharacterProfile {
            id: "りんな".into(),
            intro_template: "りんなです".into(),
            inquiry_intro_template: None,
            meaning_intro_template: None,
            display_name_in_text: "リンナ".into(),
            platform_display_name: "りんな".into(),
            platform_icon_url: String::new(),
            archaic_pronoun: false,
        }
    }

    fn placeholders() -> PlaceholderValues {
        PlaceholderValues::at(&Utc::now(), "くもり")
    }

    #[tokio::test]
    async fn renders_recorded_fixture() {
        let builder = builder();
        let mut message = RawMessage::from_user("U1", "Hello");
        message.bot_id = Some("BOT".into());

        let turns = builder.format_turns(&[message]);
        let outcome = TokenBudgetTrimmer::new(2900)
            .select(&CharTokenizer, &builder, &plain_persona(), &turns, &placeholders())
            .await
            .expect("selection should succeed");

        let BudgetOutcome::Fits(candidate) = outcome else {
            panic!("expected a fitting candidate, got {outcome:?}");
        };
        assert_eq!(candidate.text, "りんなです\n\n博多市「Hello」\nリンナ「");
        assert_eq!(candidate.dialogue_rendering, "博多市「Hello」");
    }

    #[test]
    fn merges_same_speaker_turns() {
        let builder = builder();
        let turns = builder.format_turns(&[
            RawMessage::from_user("U1", "おはよう"),
            RawMessage::from_user("U1", "いい天気"),
            RawMessage::from_user("U1", "だね！"),
            RawMessage::from_user("U1", "散歩しよう"),
            RawMessage::from_user("U2", "いいね"),
        ]);

        assert_eq!(
            turns,
            vec![
                FormattedTurn::speech("博多市", "おはよう。いい天気。だね！ 散歩しよう"),
                FormattedTurn::speech("U2", "いいね"),
            ]
        );
    }

    #[test]
    fn skips_empty_messages_and_extracts_context() {
        let builder = builder();
        let mut textless = RawMessage::from_user("U2", "");
        textless.text = None;

        let turns = builder.format_turns(&[
            textless,
            RawMessage::from_user("U2", "<@U9>"),
            RawMessage::from_user("U1", "(雨の日)こんにちは"),
            RawMessage::from_user("U1", "元気"),
        ]);

        assert_eq!(
            turns,
            vec![
                FormattedTurn::context("雨の日"),
                FormattedTurn::speech("博多市", "こんにちは。元気"),
            ]
        );
        assert_eq!(
            PromptBuilder::render_dialogue(&turns),
            "(雨の日)\n博多市「こんにちは。元気」"
        );
    }

    #[test]
    fn placeholders_follow_local_clock() {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|date| date.and_hms_opt(15, 7, 0))
            .expect("valid timestamp")
            .and_utc();
        let values = PlaceholderValues::at(&now, "はれ");

        assert_eq!(
            values.apply("[MONTH]/[DATE]([WEEKDAY]) [HOUR]:[MINUTE] [WEATHER]"),
            "3/9(土) 午後3:7 はれ"
        );

        let noon = PlaceholderValues::at(&now.with_hour(12).expect("valid hour"), "");
        assert_eq!(noon.hour, "午前12");
    }

    #[tokio::test]
    async fn keeps_widest_window_under_ceiling() {
        let builder = builder();
        let persona = plain_persona();
        let turns = vec![
            FormattedTurn::speech("A", "いちばん古い発言です"),
            FormattedTurn::speech("B", "まんなか"),
            FormattedTurn::speech("C", "新しい"),
        ];

        let widest = builder.dialogue_prompt(
            &persona,
            &PromptBuilder::render_dialogue(&turns[1..]),
            &placeholders(),
        );
        let ceiling = widest.chars().count();

        let outcome = TokenBudgetTrimmer::new(ceiling)
            .select(&CharTokenizer, &builder, &persona, &turns, &placeholders())
            .await
            .expect("selection should succeed");

        let BudgetOutcome::Fits(candidate) = outcome else {
            panic!("expected a fitting candidate, got {outcome:?}");
        };
        assert_eq!(candidate.text, widest);
        assert!(candidate.token_length <= ceiling);
    }

    #[tokio::test]
    async fn window_growth_is_monotonic() {
        let builder = builder();
        let persona = plain_persona();
        let turns = vec![
            FormattedTurn::speech("A", "あ"),
            FormattedTurn::context("雨"),
            FormattedTurn::speech("B", "いい"),
            FormattedTurn::speech("C", "ううう"),
        ];

        let mut previous = 0;
        for start in (0..turns.len()).rev() {
            let dialogue = PromptBuilder::render_dialogue(&turns[start..]);
            let text = builder.dialogue_prompt(&persona, &dialogue, &placeholders());
            let candidate = PromptCandidate::measure(&CharTokenizer, text, dialogue)
                .await
                .expect("measure should succeed");
            assert!(candidate.token_length >= previous);
            previous = candidate.token_length;
        }
    }

    #[tokio::test]
    async fn overflow_never_yields_a_fitting_candidate() {
        let builder = builder();
        let turns = vec![FormattedTurn::speech("A", "とても長い発言")];

        let outcome = TokenBudgetTrimmer::new(3)
            .select(&CharTokenizer, &builder, &plain_persona(), &turns, &placeholders())
            .await
            .expect("selection should succeed");
        let BudgetOutcome::Overflow(candidate) = outcome else {
            panic!("expected overflow, got {outcome:?}");
        };
        assert_eq!(candidate.dialogue_rendering, "A「とても長い発言」");

        let empty = TokenBudgetTrimmer::new(3)
            .select(&CharTokenizer, &builder, &plain_persona(), &[], &placeholders())
            .await
            .expect("selection should succeed");
        assert_eq!(empty, BudgetOutcome::NoTurns);
    }

    #[test]
    fn inquiry_requires_question_and_capability() {
        let builder = builder();
        let personas = default_personas();
        let rinna = &personas[0];
        let uka = &personas[2];
        let question = [RawMessage::from_user("U1", "りんな、今日は何の日？")];

        let (text, dialogue) = builder
            .inquiry_prompt(rinna, &question)
            .expect("りんな answers questions");
        assert_eq!(dialogue, "質問「りんな、今日は何の日？」");
        assert!(text.ends_with("\n質問「りんな、今日は何の日？」\n回答「"));

        assert!(builder.inquiry_prompt(uka, &question).is_none());
        assert!(
            builder
                .inquiry_prompt(rinna, &[RawMessage::from_user("U1", "こんにちは")])
                .is_none()
        );
    }

    #[test]
    fn meaning_prompt_leads_into_definition() {
        let builder = builder();
        let personas = default_personas();
        let una = &personas[1];

        let prompt = builder.meaning_prompt(una, "エモい").expect("うな explains words");
        assert!(prompt.text.ends_with(
            "\nひでお「ウナ、『エモい』ってわかる？」\nウナ「『エモい』っていうのは、"
        ));
        assert_eq!(prompt.lead_in, "『エモい』っていうのは、");
        assert!(builder.meaning_prompt(&personas[0], "エモい").is_none());
    }
}
