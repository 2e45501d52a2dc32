// src/config/settings.rs
use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf};

use crate::scheduler::cron::CronTrigger;

pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";
pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
pub const DEFAULT_DIGEST_SCHEDULE: &str = "0 17 * * 1-5";
pub const DAILY_DIGEST_JOB_ID: &str = "daily_digest";

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_schedule() -> String {
    DEFAULT_DIGEST_SCHEDULE.to_string()
}
fn default_grace_secs() -> u64 {
    300
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Process-wide settings. Built once at startup and passed into constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_schedule")]
    pub digest_schedule: String,
    #[serde(default = "default_grace_secs")]
    pub misfire_grace_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Control API address, e.g. "127.0.0.1:8088". Disabled when absent.
    #[serde(default)]
    pub http_bind: Option<String>,

    #[serde(default)]
    pub digest: DigestSettings,
    #[serde(default)]
    pub slack: Option<SlackSettings>,
    #[serde(default)]
    pub jira: Option<JiraSettings>,
    #[serde(default)]
    pub notion: Option<NotionSettings>,
    #[serde(default)]
    pub openai: Option<OpenAiSettings>,
    #[serde(default)]
    pub email: Option<EmailSettings>,
    #[serde(default)]
    pub discord: Option<DiscordSettings>,
}

/// What the daily job sends and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSettings {
    /// Sinks used by the scheduled job; empty means every registered sink.
    #[serde(default)]
    pub sinks: Vec<String>,
    #[serde(default = "DigestSettings::default_channel")]
    pub slack_channel: String,
    #[serde(default)]
    pub email_recipients: Vec<String>,
    #[serde(default = "DigestSettings::default_subject_prefix")]
    pub subject_prefix: String,
}

impl DigestSettings {
    fn default_channel() -> String {
        "#autopm-digests".to_string()
    }
    fn default_subject_prefix() -> String {
        "Project Digest".to_string()
    }
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            sinks: Vec::new(),
            slack_channel: Self::default_channel(),
            email_recipients: Vec::new(),
            subject_prefix: Self::default_subject_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSettings {
    /// Bot token; "ENV" reads SLACK_BOT_TOKEN.
    pub token: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "SlackSettings::default_lookback")]
    pub lookback_days: i64,
    #[serde(default = "SlackSettings::default_api_base")]
    pub api_base: String,
}

impl SlackSettings {
    fn default_lookback() -> i64 {
        1
    }
    fn default_api_base() -> String {
        "https://slack.com/api".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSettings {
    pub server: String,
    pub email: String,
    /// "ENV" reads JIRA_API_TOKEN.
    pub api_token: String,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default = "JiraSettings::default_lookback")]
    pub lookback_days: i64,
}

impl JiraSettings {
    fn default_lookback() -> i64 {
        7
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionSettings {
    /// "ENV" reads NOTION_API_KEY.
    pub api_key: String,
    pub database_id: String,
    #[serde(default = "NotionSettings::default_lookback")]
    pub lookback_days: i64,
    #[serde(default = "NotionSettings::default_api_base")]
    pub api_base: String,
}

impl NotionSettings {
    fn default_lookback() -> i64 {
        3
    }
    fn default_api_base() -> String {
        "https://api.notion.com/v1".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSettings {
    /// "ENV" reads OPENAI_API_KEY.
    pub api_key: String,
    #[serde(default = "OpenAiSettings::default_model")]
    pub model: String,
    #[serde(default = "OpenAiSettings::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "OpenAiSettings::default_endpoint")]
    pub endpoint: String,
}

impl OpenAiSettings {
    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }
    fn default_max_tokens() -> u32 {
        4000
    }
    fn default_endpoint() -> String {
        "https://api.openai.com/v1/chat/completions".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    #[serde(default = "EmailSettings::default_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    /// "ENV" reads SMTP_PASSWORD.
    #[serde(default)]
    pub password: String,
    /// Defaults to `username` when empty.
    #[serde(default)]
    pub from: String,
    #[serde(default = "EmailSettings::default_starttls")]
    pub starttls: bool,
}

impl EmailSettings {
    fn default_port() -> u16 {
        587
    }
    fn default_starttls() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordSettings {
    /// "ENV" reads DISCORD_WEBHOOK_URL.
    pub webhook_url: String,
    #[serde(default = "DiscordSettings::default_retries")]
    pub max_retries: u8,
}

impl DiscordSettings {
    fn default_retries() -> u8 {
        3
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            digest_schedule: default_schedule(),
            misfire_grace_secs: default_grace_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            log_level: default_log_level(),
            http_bind: None,
            digest: DigestSettings::default(),
            slack: None,
            jira: None,
            notion: None,
            openai: None,
            email: None,
            discord: None,
        }
    }
}

impl Settings {
    /// Load settings using env var + fallbacks:
    /// 1) $DIGEST_CONFIG_PATH (must exist)
    /// 2) config/digest.toml
    /// 3) built-in defaults
    ///
    /// Env overrides (DIGEST_SCHEDULE, TIMEZONE, LOG_LEVEL) apply in every case.
    pub fn load() -> Result<Self> {
        let mut settings = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::read_file(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::read_file(&default_p)?
            } else {
                Self::default()
            }
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML file without env overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let settings = Self::read_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(s).context("parsing digest settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("DIGEST_SCHEDULE") {
            self.digest_schedule = v;
        }
        if let Ok(v) = env::var("TIMEZONE") {
            self.timezone = v;
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            self.log_level = v;
        }
    }

    fn validate(&self) -> Result<()> {
        let tz = self.tz()?;
        CronTrigger::parse(&self.digest_schedule, tz)
            .map_err(|e| anyhow!("digest_schedule: {e}"))?;
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow!("Unknown timezone: {}", self.timezone))
    }

    pub fn misfire_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.misfire_grace_secs)
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.send_timeout_secs)
    }
}

/// Resolve a secret: the literal "ENV" (any case) reads `env_var`, anything else is used as-is.
/// An empty result is an error so adapters never start with blank credentials.
pub fn resolve_secret(value: &str, env_var: &str) -> Result<String> {
    let resolved = if value.trim().eq_ignore_ascii_case("env") {
        env::var(env_var).map_err(|_| anyhow!("Missing {env_var} env var"))?
    } else {
        value.trim().to_string()
    };
    if resolved.is_empty() {
        anyhow::bail!("empty secret (expected value or {env_var})");
    }
    Ok(resolved)
}
