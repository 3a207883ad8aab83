//! Configuration loading and validation.

use crate::ComputeMode;
use crate::error::{ConfigError, Result};
use crate::llm::SamplingConfig;
use crate::persona::{CharacterProfile, PersonaSet, ThemedGroup, default_personas, default_themed_groups};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "rinnabot.toml";

/// rinnabot configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path. Holds the config file and the audit database.
    pub data_dir: PathBuf,

    /// Log posts instead of sending them.
    pub dry_run: bool,

    pub generation: GenerationConfig,
    pub slack: SlackConfig,
    pub moderation: ModerationConfig,
    pub pubsub: PubSubConfig,
    pub router: RouterConfig,
    pub prompt: PromptConfig,
    pub logging: LoggingConfig,

    /// Persona table.
    pub personas: Vec<CharacterProfile>,
    /// Persona ids in trigger-scan order. Empty keeps table order.
    pub trigger_order: Vec<String>,
    pub themed_groups: Vec<ThemedGroup>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dry_run: false,
            generation: GenerationConfig::default(),
            slack: SlackConfig::default(),
            moderation: ModerationConfig::default(),
            pubsub: PubSubConfig::default(),
            router: RouterConfig::default(),
            prompt: PromptConfig::default(),
            logging: LoggingConfig::default(),
            personas: default_personas(),
            trigger_order: Vec::new(),
            themed_groups: default_themed_groups(),
        }
    }
}

/// Text generation backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// llama.cpp server base URL.
    pub server_url: String,
    pub compute_mode: ComputeMode,
    /// Prompts longer than this many tokens are never sent.
    pub token_ceiling: usize,
    pub timeout_secs: u64,
    pub sampling: SamplingConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            compute_mode: ComputeMode::Gpu,
            token_ceiling: 2900,
            timeout_secs: 120,
            sampling: SamplingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    pub channel: String,
    /// Bot id persona posts arrive under.
    pub automation_bot_id: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel: "C7AAX50QY".into(),
            automation_bot_id: "BEHP604TV".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub google_api_key: Option<String>,
    pub content_moderator_endpoint: Option<String>,
    pub content_moderator_key: Option<String>,
    /// Screener terms that never block a chunk.
    pub allow_list: Vec<String>,
    pub censor_marker: String,
    pub timeout_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            content_moderator_endpoint: None,
            content_moderator_key: None,
            allow_list: vec!["えた".into(), "クリ".into()],
            censor_marker: "##### CENSORED #####".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub project_id: String,
    pub access_token: Option<String>,
    /// Address the push endpoint listens on.
    pub bind: String,
    /// Deliveries that may wait while one is being handled.
    pub queue_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project_id: "hakatabot".into(),
            access_token: None,
            bind: "0.0.0.0:8080".into(),
            queue_capacity: crate::agent::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub thread_stale_after_secs: i64,
    pub ping_freshness_secs: i64,
    pub post_pacing_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            thread_stale_after_secs: 15 * 60,
            ping_freshness_secs: 60,
            post_pacing_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub weather: String,
    /// IANA time zone used for date placeholders.
    pub time_zone: String,
    /// Speaker name asking the question in meaning prompts.
    pub meaning_asker: String,
    /// Sender id → name shown in transcripts.
    pub user_aliases: HashMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            weather: "くもり".into(),
            time_zone: "Asia/Tokyo".into(),
            meaning_asker: "ひでお".into(),
            user_aliases: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files. Stderr only when unset.
    pub dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("rinnabot"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

impl Config {
    /// Load `rinnabot.toml` from the data directory, falling back to
    /// defaults when it does not exist, then apply environment overrides.
    /// Callers run [`Config::validate`] once command-line overrides are in.
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var_os("RINNABOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::parse_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.data_dir = data_dir;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: std::sync::Arc::new(error),
        })?;
        Ok(toml::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.display().to_string(),
            message: error.to_string(),
        })?)
    }

    /// Secrets and deployment knobs from the environment win over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = lookup("SLACK_TOKEN") {
            self.slack.bot_token = Some(token);
        }
        if let Some(endpoint) = lookup("CONTENT_MODERATOR_ENDPOINT") {
            self.moderation.content_moderator_endpoint = Some(endpoint);
        }
        if let Some(key) = lookup("CONTENT_MODERATOR_SUBSCRIPTION_KEY") {
            self.moderation.content_moderator_key = Some(key);
        }
        if let Some(key) = lookup("GOOGLE_LANGUAGE_API_KEY") {
            self.moderation.google_api_key = Some(key);
        }
        if let Some(token) = lookup("PUBSUB_ACCESS_TOKEN") {
            self.pubsub.access_token = Some(token);
        }
        if let Some(url) = lookup("LLAMA_SERVER_URL") {
            self.generation.server_url = url;
        }
        if let Some(mode) = lookup("RINNABOT_COMPUTE_MODE") {
            match mode.parse() {
                Ok(mode) => self.generation.compute_mode = mode,
                Err(error) => tracing::warn!(%error, "ignoring RINNABOT_COMPUTE_MODE"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.persona_set()?;

        if self.generation.token_ceiling == 0 {
            return Err(ConfigError::Invalid("generation.token_ceiling must be positive".into()).into());
        }

        self.time_zone()?;

        if !self.dry_run && self.slack.bot_token.is_none() {
            return Err(ConfigError::MissingKey("slack.bot_token (or SLACK_TOKEN)".into()).into());
        }

        Ok(())
    }

    pub fn time_zone(&self) -> std::result::Result<chrono_tz::Tz, ConfigError> {
        self.prompt.time_zone.parse().map_err(|_| {
            ConfigError::Invalid(format!("unknown time zone '{}'", self.prompt.time_zone))
        })
    }

    /// Personas ordered by `trigger_order`. Personas the order does not name
    /// keep their table position after the named ones.
    pub fn persona_set(&self) -> std::result::Result<PersonaSet, ConfigError> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::with_capacity(self.personas.len());

        for id in &self.trigger_order {
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("trigger order repeats '{id}'")));
            }
            let persona = self
                .personas
                .iter()
                .find(|persona| &persona.id == id)
                .ok_or_else(|| ConfigError::UnknownPersona(id.clone()))?;
            ordered.push(persona.clone());
        }
        ordered.extend(
            self.personas
                .iter()
                .filter(|persona| !seen.contains(persona.id.as_str()))
                .cloned(),
        );

        PersonaSet::new(ordered, self.themed_groups.clone())
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("rinnabot.db")
    }

    pub fn thread_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.router.thread_stale_after_secs)
    }

    pub fn ping_freshness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.router.ping_freshness_secs)
    }

    pub fn post_pacing(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.router.post_pacing_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        file.write_all(content.as_bytes())
            .expect("config should be written");
        file
    }

    fn parse(content: &str) -> Config {
        toml::from_str(content).expect("config should parse")
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("");
        assert_eq!(config.generation.token_ceiling, 2900);
        assert_eq!(config.generation.sampling.max_new_tokens, 128);
        assert_eq!(config.slack.channel, "C7AAX50QY");
        assert_eq!(config.slack.automation_bot_id, "BEHP604TV");
        assert_eq!(config.moderation.allow_list, vec!["えた", "クリ"]);
        assert_eq!(config.moderation.censor_marker, "##### CENSORED #####");
        assert_eq!(config.thread_stale_after(), chrono::Duration::minutes(15));
        assert_eq!(config.ping_freshness(), chrono::Duration::seconds(60));
        assert_eq!(config.post_pacing(), std::time::Duration::from_millis(1000));
        assert_eq!(config.prompt.weather, "くもり");
        assert_eq!(config.time_zone().expect("default zone"), chrono_tz::Asia::Tokyo);
        assert_eq!(config.personas.len(), 5);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse(
            r#"
            dry_run = true

            [generation]
            token_ceiling = 1000
            compute_mode = "CPU"

            [generation.sampling]
            temperature = 0.5

            [router]
            post_pacing_ms = 0

            [prompt.user_aliases]
            U1 = "博多市"
            "#,
        );

        assert!(config.dry_run);
        assert_eq!(config.generation.token_ceiling, 1000);
        assert_eq!(config.generation.compute_mode, ComputeMode::Cpu);
        assert_eq!(config.generation.sampling.temperature, 0.5);
        assert_eq!(config.generation.sampling.max_new_tokens, 128);
        assert!(config.post_pacing().is_zero());
        assert_eq!(config.prompt.user_aliases["U1"], "博多市");
        config.validate().expect("dry run needs no token");
    }

    #[test]
    fn environment_wins_over_file() {
        let mut config = parse(
            r#"
            [slack]
            bot_token = "xoxb-file"
            "#,
        );
        let env = HashMap::from([
            ("SLACK_TOKEN", "xoxb-env"),
            ("LLAMA_SERVER_URL", "http://gpu:9000"),
            ("RINNABOT_COMPUTE_MODE", "cpu"),
            ("GOOGLE_LANGUAGE_API_KEY", ""),
        ]);
        config.apply_env_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.slack.bot_token.as_deref(), Some("xoxb-env"));
        assert_eq!(config.generation.server_url, "http://gpu:9000");
        assert_eq!(config.generation.compute_mode, ComputeMode::Cpu);
        assert_eq!(config.moderation.google_api_key, None);
    }

    #[test]
    fn trigger_order_reorders_personas() {
        let mut config = parse("dry_run = true");
        config.trigger_order = vec!["たたも".into(), "うな".into()];

        let ids: Vec<String> = config
            .persona_set()
            .expect("order is valid")
            .iter()
            .map(|persona| persona.id.clone())
            .collect();
        assert_eq!(ids, vec!["たたも", "うな", "りんな", "うか", "うの"]);

        config.trigger_order = vec!["だれ".into()];
        assert!(matches!(
            config.persona_set(),
            Err(ConfigError::UnknownPersona(id)) if id == "だれ"
        ));
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let config = parse("");
        let error = config.validate().expect_err("live mode needs a token");
        assert!(error.to_string().contains("slack.bot_token"));

        let mut config = parse("dry_run = true");
        config.generation.token_ceiling = 0;
        assert!(config.validate().is_err());

        let mut config = parse("dry_run = true");
        config.personas.clear();
        assert!(config.validate().is_err());

        let mut config = parse("dry_run = true");
        config.prompt.time_zone = "Mars/Olympus".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_and_reports_files() {
        let file = write_config("dry_run = true\n[pubsub]\nbind = \"127.0.0.1:9999\"\n");
        let config = Config::load_from_path(file.path()).expect("config should load");
        assert_eq!(config.pubsub.bind, "127.0.0.1:9999");

        let broken = write_config("[generation\n");
        let error = Config::load_from_path(broken.path()).expect_err("invalid toml");
        assert!(matches!(error, crate::Error::Config(ConfigError::Parse { .. })));

        let missing = Config::load_from_path(Path::new("/nonexistent/rinnabot.toml"))
            .expect_err("missing file");
        assert!(matches!(missing, crate::Error::Config(ConfigError::Load { .. })));
    }
}
