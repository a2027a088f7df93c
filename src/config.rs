//! Configuration for linboard.
//!
//! Read from `linboard.toml` with every field defaulted, then layered:
//! file → environment (`LINBOARD_*`) → CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".linboard/board.db"
//! dev_mode = false
//!
//! [realtime]
//! channel_capacity = 256
//!
//! [board]
//! commit_mode = "best_effort"
//!
//! [assistant]
//! endpoint = ""
//! model = "gemini-pro"
//! api_key_env = "LINBOARD_ASSISTANT_KEY"
//!
//! [logging]
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "linboard.toml";

/// How a bulk order commit persists its writes.
///
/// | Mode         | Behavior                                                      |
/// |--------------|---------------------------------------------------------------|
/// | `BestEffort` | One write per item; the first failure stops, earlier writes stay |
/// | `Atomic`     | All items loaded and authorized first, then one transaction    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    #[default]
    BestEffort,
    Atomic,
}

impl std::fmt::Display for CommitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitMode::BestEffort => write!(f, "best_effort"),
            CommitMode::Atomic => write!(f, "atomic"),
        }
    }
}

impl std::str::FromStr for CommitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(CommitMode::BestEffort),
            "atomic" => Ok(CommitMode::Atomic),
            _ => anyhow::bail!(
                "Invalid commit mode '{}'. Valid values: best_effort, atomic",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS and bind on all interfaces.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".linboard/board.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSection {
    /// Events buffered per workspace before a slow subscriber starts losing them.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    crate::board::events::DEFAULT_CHANNEL_CAPACITY
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardSection {
    #[serde(default)]
    pub commit_mode: CommitMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSection {
    /// Empty disables the assistant.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_model() -> String {
    "gemini-pro".to_string()
}

fn default_api_key_env() -> String {
    "LINBOARD_ASSISTANT_KEY".to_string()
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl AssistantSection {
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub board: BoardSection,
    #[serde(default)]
    pub assistant: AssistantSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse linboard.toml")
    }

    /// Load `path` if it exists, otherwise defaults; then apply environment
    /// overrides.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `LINBOARD_PORT`, `LINBOARD_DB_PATH` and `LINBOARD_COMMIT_MODE`
    /// from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("LINBOARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid LINBOARD_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("LINBOARD_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(mode) = lookup("LINBOARD_COMMIT_MODE") {
            self.board.commit_mode = mode.parse()?;
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Address the server binds to.
    pub fn bind_host(&self) -> &str {
        if self.server.dev_mode {
            "0.0.0.0"
        } else {
            &self.server.host
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.realtime.channel_capacity == 0 {
            warnings.push("realtime.channel_capacity is 0; using 1".to_string());
        }
        if self.assistant.is_enabled() && self.assistant.api_key().is_none() {
            warnings.push(format!(
                "assistant.endpoint is set but {} is empty",
                self.assistant.api_key_env
            ));
        }
        warnings
    }
}
