use std::path::PathBuf;
use std::time::Duration;

use evalboard_evals::{HealthConfig, RunnerConfig};
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEvalboardConfig {
    #[serde(default)]
    pub storage: RawStorageConfig,

    #[serde(default)]
    pub runner: RawRunnerConfig,

    #[serde(default)]
    pub provider: RawProviderConfig,

    #[serde(default)]
    pub health: RawHealthConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStorageConfig {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRunnerConfig {
    pub parallelism: Option<usize>,
    pub max_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProviderConfig {
    pub kind: Option<ProviderKind>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHealthConfig {
    pub top_failing: Option<usize>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvalboardConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub runner: RunnerSection,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub health: HealthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local database file, used unless `url` is set
    pub path: PathBuf,

    /// Remote libSQL database URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: evalboard_paths::default_database_path(),
            url: None,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Concurrent provider calls per run
    pub parallelism: usize,

    /// Attempts per test case, including the first
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    pub retry_backoff_ms: u64,

    pub call_timeout_secs: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        let defaults = RunnerConfig::default();
        Self {
            parallelism: defaults.parallelism,
            max_attempts: defaults.max_attempts,
            retry_backoff_ms: defaults.retry_backoff.as_millis() as u64,
            call_timeout_secs: defaults.call_timeout.as_secs(),
        }
    }
}

impl RunnerSection {
    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            parallelism: self.parallelism.max(1),
            max_attempts: self.max_attempts.max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

/// Which model backend answers evaluation prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Replies with the last line of the prompt; useful for dry runs
    Echo,
    #[default]
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Base URL for the Ollama server
    pub host: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            host: DEFAULT_OLLAMA_HOST.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    /// Number of worst failing tests shown in health reports
    pub top_failing: usize,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            top_failing: HealthConfig::default().top_failing,
        }
    }
}

impl HealthSection {
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            top_failing: self.top_failing,
        }
    }
}

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
