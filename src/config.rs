//! Configuration loader and validator for the feed autoposter.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub schedule: Schedule,
    pub sources: Sources,
    pub tagging: Tagging,
    pub caption: Caption,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default)]
    pub fetch: Fetch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Publish dispatcher poll interval.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Numeric chat id or `@channel_username`.
    pub channel: String,
}

/// Batch scheduler cadence and sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Schedule {
    pub target_count: usize,
    pub cadence_minutes: u64,
    pub lead_time_minutes: u64,
    /// How many candidates to request per source; covers dedup/failure attrition.
    pub fetch_limit: usize,
    pub cycle_interval_minutes: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            target_count: 8,
            cadence_minutes: 180,
            lead_time_minutes: 60,
            fetch_limit: 50,
            cycle_interval_minutes: 1440,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sources {
    pub primary: Vec<SourceConfig>,
    pub fallback: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Reddit { label: String, subreddit: String },
    JsonFeed { label: String, url: String },
}

impl SourceConfig {
    pub fn label(&self) -> &str {
        match self {
            SourceConfig::Reddit { label, .. } | SourceConfig::JsonFeed { label, .. } => label,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tagging {
    pub base_url: String,
    #[serde(default = "default_true")]
    pub high_precision_enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    #[serde(default = "default_interrogate_models")]
    pub interrogate_models: Vec<String>,
    #[serde(default = "default_tagging_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Caption {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_caption_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default)]
    pub disallowed_terms: Vec<String>,
    /// How many recently rejected captions to feed back as negative examples.
    #[serde(default = "default_negative_examples")]
    pub negative_examples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Delivery {
    pub timeout_seconds: u64,
}

impl Default for Delivery {
    fn default() -> Self {
        Self { timeout_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Fetch {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for Fetch {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
            user_agent: "tg-autoposter/0.1".into(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_threshold() -> f64 {
    0.35
}
fn default_max_tags() -> usize {
    20
}
fn default_interrogate_models() -> Vec<String> {
    vec!["deepdanbooru".into(), "deepbooru".into(), "clip".into()]
}
fn default_tagging_timeout() -> u64 {
    120
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    150
}
fn default_caption_timeout() -> u64 {
    120
}
fn default_min_chars() -> usize {
    20
}
fn default_negative_examples() -> usize {
    5
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/autoposter.db", self.app.data_dir))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.app.poll_interval_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.timeout_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.channel.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.channel must be non-empty"));
    }

    let s = &cfg.schedule;
    if s.target_count == 0 {
        return Err(ConfigError::Invalid("schedule.target_count must be > 0"));
    }
    if s.cadence_minutes == 0 {
        return Err(ConfigError::Invalid("schedule.cadence_minutes must be > 0"));
    }
    if s.fetch_limit < s.target_count {
        return Err(ConfigError::Invalid(
            "schedule.fetch_limit must be >= schedule.target_count",
        ));
    }
    if s.cycle_interval_minutes == 0 {
        return Err(ConfigError::Invalid(
            "schedule.cycle_interval_minutes must be > 0",
        ));
    }

    if cfg.sources.primary.is_empty() {
        return Err(ConfigError::Invalid("sources.primary must list at least one source"));
    }
    for src in cfg.sources.primary.iter().chain(std::iter::once(&cfg.sources.fallback)) {
        validate_source(src)?;
    }

    if cfg.tagging.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("tagging.base_url must be non-empty"));
    }
    if !(0.0..=1.0).contains(&cfg.tagging.threshold) {
        return Err(ConfigError::Invalid("tagging.threshold must be within 0..=1"));
    }
    if cfg.tagging.interrogate_models.is_empty() {
        return Err(ConfigError::Invalid(
            "tagging.interrogate_models must list at least one model",
        ));
    }

    if cfg.caption.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("caption.base_url must be non-empty"));
    }
    if cfg.caption.model.trim().is_empty() {
        return Err(ConfigError::Invalid("caption.model must be non-empty"));
    }

    if cfg.tagging.timeout_seconds == 0
        || cfg.caption.timeout_seconds == 0
        || cfg.delivery.timeout_seconds == 0
        || cfg.fetch.timeout_seconds == 0
    {
        return Err(ConfigError::Invalid("collaborator timeouts must be > 0"));
    }

    Ok(())
}

fn validate_source(src: &SourceConfig) -> Result<(), ConfigError> {
    if src.label().trim().is_empty() {
        return Err(ConfigError::Invalid("sources: every source needs a non-empty label"));
    }
    match src {
        SourceConfig::Reddit { subreddit, .. } if subreddit.trim().is_empty() => Err(
            ConfigError::Invalid("sources: reddit subreddit must be non-empty"),
        ),
        SourceConfig::JsonFeed { url, .. } if reqwest::Url::parse(url).is_err() => Err(
            ConfigError::Invalid("sources: json_feed url must be an absolute URL"),
        ),
        _ => Ok(()),
    }
}

/// Example configuration covering every section.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 60000

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  channel: "@your_channel"

schedule:
  target_count: 8
  cadence_minutes: 180
  lead_time_minutes: 60
  fetch_limit: 50
  cycle_interval_minutes: 1440

sources:
  primary:
    - kind: reddit
      label: "reddit:awwnime"
      subreddit: "awwnime"
    - kind: reddit
      label: "reddit:pixelart"
      subreddit: "PixelArt"
  fallback:
    kind: json_feed
    label: "waifu.im"
    url: "https://api.waifu.im/search"

tagging:
  base_url: "http://127.0.0.1:7860"
  high_precision_enabled: true
  threshold: 0.35
  max_tags: 20
  interrogate_models: ["deepdanbooru", "deepbooru", "clip"]
  timeout_seconds: 120

caption:
  base_url: "http://127.0.0.1:1234"
  model: "saiga_nemo_12b_gguf"
  system_prompt: "You write short, vivid one-paragraph descriptions of artwork."
  temperature: 0.7
  max_tokens: 150
  timeout_seconds: 120
  min_chars: 20
  disallowed_terms: ["as an ai", "i cannot"]
  negative_examples: 5

delivery:
  timeout_seconds: 60

fetch:
  timeout_seconds: 15
  user_agent: "tg-autoposter/0.1"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sources.primary.len(), 2);
        assert_eq!(cfg.sources.fallback.label(), "waifu.im");
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let yaml = r#"app: { data_dir: "./data", poll_interval_ms: 1000 }
telegram: { bot_token: "t", channel: "-1001234" }
sources:
  primary: [{ kind: reddit, label: "r", subreddit: "pics" }]
  fallback: { kind: json_feed, label: "f", url: "https://feed.example/api" }
tagging: { base_url: "http://sd" }
caption: { base_url: "http://lm", model: "m", system_prompt: "p" }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.schedule, Schedule::default());
        assert_eq!(cfg.delivery.timeout_seconds, 60);
        assert_eq!(cfg.fetch.timeout_seconds, 15);
        assert!(cfg.tagging.high_precision_enabled);
        assert_eq!(cfg.caption.min_chars, 20);
        validate(&cfg).unwrap();
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let yaml = format!("{}\nextra_section: 1\n", example());
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg = example_cfg();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_schedule_values() {
        let mut cfg = example_cfg();
        cfg.schedule.target_count = 0;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::Invalid(m)) if m.contains("target_count")
        ));

        let mut cfg = example_cfg();
        cfg.schedule.cadence_minutes = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("cadence")));

        let mut cfg = example_cfg();
        cfg.schedule.fetch_limit = 3;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::Invalid(m)) if m.contains("fetch_limit")
        ));
    }

    #[test]
    fn invalid_sources() {
        let mut cfg = example_cfg();
        cfg.sources.primary.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("primary")));

        let mut cfg = example_cfg();
        cfg.sources.fallback = SourceConfig::JsonFeed {
            label: "feed".into(),
            url: "not a url".into(),
        };
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.sources.primary[0] = SourceConfig::Reddit {
            label: " ".into(),
            subreddit: "x".into(),
        };
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("label")));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = example_cfg();
        cfg.delivery.timeout_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("timeouts")));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.telegram.channel, "@your_channel");
        assert_eq!(cfg.schedule.target_count, 8);
    }
}
