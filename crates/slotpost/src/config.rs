//! Runtime configuration for the poster.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variables (`SLOTPOST_*`)
//! 2. `slotpost.toml` (path from `--config` or `SLOTPOST_CONFIG`)
//! 3. Built-in defaults
//!
//! Credentials are read from the environment only; the matching TOML keys
//! are ignored.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use assembly::{AssemblyConfig, PipelineResult, ScheduleTable, SlotEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "slotpost.toml";
const DEFAULT_HISTORY_PATH: &str = "history.json";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CATALOG_URL: &str = "https://api.igdb.com/v4";
const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BSKY_URL: &str = "https://bsky.social";

pub const ENV_CONFIG_PATH: &str = "SLOTPOST_CONFIG";
const ENV_CATALOG_URL: &str = "SLOTPOST_CATALOG_URL";
const ENV_CATALOG_CLIENT_ID: &str = "SLOTPOST_CATALOG_CLIENT_ID";
const ENV_CATALOG_TOKEN: &str = "SLOTPOST_CATALOG_TOKEN";
const ENV_LLM_URL: &str = "SLOTPOST_LLM_URL";
const ENV_LLM_MODEL: &str = "SLOTPOST_LLM_MODEL";
const ENV_LLM_API_KEY: &str = "SLOTPOST_LLM_API_KEY";
const ENV_BSKY_URL: &str = "SLOTPOST_BSKY_URL";
const ENV_BSKY_HANDLE: &str = "SLOTPOST_BSKY_HANDLE";
const ENV_BSKY_PASSWORD: &str = "SLOTPOST_BSKY_PASSWORD";
const ENV_FORCED_SLOT: &str = "SLOTPOST_FORCED_SLOT";
const ENV_MANUAL: &str = "SLOTPOST_MANUAL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// IGDB-style catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub base_url: String,
    #[serde(skip)]
    pub client_id: String,
    #[serde(skip)]
    pub token: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_URL.to_string(),
            client_id: String::new(),
            token: String::new(),
        }
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Optional: local servers usually accept anonymous requests.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: 0.8,
            api_key: None,
        }
    }
}

/// AT-protocol PDS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub base_url: String,
    #[serde(skip)]
    pub handle: String,
    #[serde(skip)]
    pub password: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BSKY_URL.to_string(),
            handle: String::new(),
            password: String::new(),
        }
    }
}

/// Manual triggers that mirror the `run` flags.
#[derive(Debug, Clone, Default)]
pub struct TriggerSettings {
    pub forced_slot: Option<String>,
    pub manual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub history_path: PathBuf,
    pub http_timeout_secs: u64,
    pub catalog: CatalogSettings,
    pub llm: LlmSettings,
    pub publisher: PublisherSettings,
    /// Replaces the built-in weekly table when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<SlotEntry>>,
    pub assembly: AssemblyConfig,
    #[serde(skip)]
    pub trigger: TriggerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            catalog: CatalogSettings::default(),
            llm: LlmSettings::default(),
            publisher: PublisherSettings::default(),
            schedule: None,
            assembly: AssemblyConfig::default(),
            trigger: TriggerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Read the config file (if any) and apply environment overrides.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                tracing::debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
            .context(format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid slotpost TOML")
    }

    /// Overlay `SLOTPOST_*` variables. Blank values count as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_CATALOG_URL) {
            self.catalog.base_url = v;
        }
        if let Some(v) = get(ENV_CATALOG_CLIENT_ID) {
            self.catalog.client_id = v;
        }
        if let Some(v) = get(ENV_CATALOG_TOKEN) {
            self.catalog.token = v;
        }
        if let Some(v) = get(ENV_LLM_URL) {
            self.llm.base_url = v;
        }
        if let Some(v) = get(ENV_LLM_MODEL) {
            self.llm.model = v;
        }
        if let Some(v) = get(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get(ENV_BSKY_URL) {
            self.publisher.base_url = v;
        }
        if let Some(v) = get(ENV_BSKY_HANDLE) {
            self.publisher.handle = v;
        }
        if let Some(v) = get(ENV_BSKY_PASSWORD) {
            self.publisher.password = v;
        }
        if let Some(v) = get(ENV_FORCED_SLOT) {
            self.trigger.forced_slot = Some(v);
        }
        if let Some(v) = get(ENV_MANUAL) {
            let flag = v.trim().to_ascii_lowercase();
            self.trigger.manual = matches!(flag.as_str(), "true" | "1" | "yes");
        }
    }

    /// Check credentials and tunables before any client is built.
    ///
    /// Publisher credentials are only required when `publishing`.
    pub fn validate(&self, publishing: bool) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.catalog.client_id.is_empty() {
            missing.push(ENV_CATALOG_CLIENT_ID);
        }
        if self.catalog.token.is_empty() {
            missing.push(ENV_CATALOG_TOKEN);
        }
        if publishing {
            if self.publisher.handle.is_empty() {
                missing.push(ENV_BSKY_HANDLE);
            }
            if self.publisher.password.is_empty() {
                missing.push(ENV_BSKY_PASSWORD);
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials(missing));
        }

        let mut problems = self.assembly.validate();
        if let Err(e) = self.schedule_table() {
            problems.push(e.to_string());
        }
        if self.http_timeout_secs == 0 {
            problems.push("http_timeout_secs must be at least 1".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn schedule_table(&self) -> PipelineResult<ScheduleTable> {
        match &self.schedule {
            Some(entries) => ScheduleTable::from_entries(entries),
            None => Ok(ScheduleTable::default()),
        }
    }
}
