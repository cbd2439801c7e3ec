//! Configuration for the marco binary
//!
//! YAML, looked up at:
//! 1. `$MARCO_CONFIG`
//! 2. `$CLI_AGENT_CONFIG`
//! 3. `~/.marco/config.yaml`
//!
//! A missing file means all defaults; the API key may come from
//! `OPENAI_API_KEY` instead.

use marco_intent::ValidationMode;
use marco_mcp::{DisambiguationPolicy, FsConfig, McpPolicy, PolicyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "MARCO_CONFIG";
pub const LEGACY_CONFIG_ENV: &str = "CLI_AGENT_CONFIG";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const REDACTED: &str = "<redacted>";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no LLM API key: set intentparser.llm_api_key or {}", API_KEY_ENV)]
    MissingApiKey,

    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub intentparser: IntentParserConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub fs: FsSection,
}

/// Classifier backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentParserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for IntentParserConfig {
    fn default() -> Self {
        Self {
            llm_api_key: None,
            model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub acceptance_threshold: f64,
    pub completion_threshold: f64,
    pub max_clarification_rounds: u32,
    pub classifier_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub max_steps: usize,
    /// Reject parameters the schema does not declare instead of dropping them.
    pub strict_validation: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = McpPolicy::default();
        Self {
            acceptance_threshold: policy.disambiguation.acceptance_threshold,
            completion_threshold: policy.disambiguation.completion_threshold,
            max_clarification_rounds: policy.disambiguation.max_clarification_rounds,
            classifier_timeout_ms: policy.classifier_timeout.as_millis() as u64,
            dispatch_timeout_ms: policy.dispatch_timeout.as_millis() as u64,
            command_timeout_ms: policy.command_timeout.as_millis() as u64,
            confirmation_timeout_ms: policy.confirmation_timeout.as_millis() as u64,
            max_steps: policy.max_steps,
            strict_validation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsSection {
    pub root: PathBuf,
    pub max_matches: usize,
    pub max_read_bytes: u64,
}

impl Default for FsSection {
    fn default() -> Self {
        let fs = FsConfig::default();
        Self {
            root: fs.root,
            max_matches: fs.max_matches,
            max_read_bytes: fs.max_read_bytes,
        }
    }
}

/// Where the config file is expected.
pub fn config_path() -> PathBuf {
    [CONFIG_ENV, LEGACY_CONFIG_ENV]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| marco_logging::marco_home().join("config.yaml"))
}

/// Load from [`config_path`]; defaults when the file does not exist.
pub fn load() -> Result<Config> {
    let path = config_path();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file; using defaults");
        return Ok(Config::default());
    }
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn parse(content: &str) -> std::result::Result<Config, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(content)
}

impl Config {
    /// Configured key, falling back to `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_or(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_or(&self, fallback: Option<String>) -> Result<String> {
        self.intentparser
            .llm_api_key
            .clone()
            .into_iter()
            .chain(fallback)
            .find(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Validated orchestrator policy.
    pub fn policy(&self) -> Result<McpPolicy> {
        let p = &self.policy;
        let policy = McpPolicy {
            disambiguation: DisambiguationPolicy {
                acceptance_threshold: p.acceptance_threshold,
                completion_threshold: p.completion_threshold,
                max_clarification_rounds: p.max_clarification_rounds,
            },
            classifier_timeout: Duration::from_millis(p.classifier_timeout_ms),
            dispatch_timeout: Duration::from_millis(p.dispatch_timeout_ms),
            command_timeout: Duration::from_millis(p.command_timeout_ms),
            confirmation_timeout: Duration::from_millis(p.confirmation_timeout_ms),
            max_steps: p.max_steps,
            validation_mode: if p.strict_validation {
                ValidationMode::Strict
            } else {
                ValidationMode::Lenient
            },
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn fs_config(&self) -> FsConfig {
        FsConfig {
            root: self.fs.root.clone(),
            max_matches: self.fs.max_matches,
            max_read_bytes: self.fs.max_read_bytes,
        }
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Config {
        let mut config = self.clone();
        if config.intentparser.llm_api_key.is_some() {
            config.intentparser.llm_api_key = Some(REDACTED.to_string());
        }
        config
    }
}
