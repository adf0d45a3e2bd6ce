//! Configuration loading and config file resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (applied by each service binary)
//! 2. Environment variables (`CVR_*`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is never fatal: the service logs a warning and
//! starts on defaults. An explicitly requested file that does not exist is
//! a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "CVR_CONFIG";
/// Environment variable carrying the dispatcher/worker shared secret
pub const ENV_SHARED_SECRET: &str = "CVR_SHARED_SECRET";
/// Environment variable overriding the database path
pub const ENV_DATABASE: &str = "CVR_DATABASE";
/// Environment variable carrying the LLM provider API key
pub const ENV_LLM_API_KEY: &str = "CVR_LLM_API_KEY";
/// Environment variable overriding the listen address
pub const ENV_BIND_ADDR: &str = "CVR_BIND_ADDR";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Listen address for the HTTP server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Base URL the trigger uses to reach the internal worker endpoint
    #[serde(default = "default_internal_base_url")]
    pub internal_base_url: String,

    /// Shared secret authenticating trigger → worker calls
    #[serde(default)]
    pub shared_secret: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Extraction model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call timeout
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,

    /// Linear backoff unit: attempt N waits N × this delay
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Attempts allowed after the first one, at most `MAX_LLM_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Product thresholds driving billing and status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Usage is recorded only strictly above this completion percentage
    #[serde(default = "default_usage_threshold")]
    pub usage_threshold_percent: u8,

    /// Responses strictly above this completion percentage are `completed`
    #[serde(default = "default_complete_threshold")]
    pub complete_threshold_percent: u8,
}

/// How the trigger hands work to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Self-addressed HTTP call to the internal worker endpoint
    #[default]
    Http,
    /// In-process queue drained by a background worker task
    InProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5740".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cvr").join("cvr.db"))
        .unwrap_or_else(|| PathBuf::from("./cvr_data/cvr.db"))
}

fn default_internal_base_url() -> String {
    "http://127.0.0.1:5740".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

/// Upper bound on `llm.max_retries`: three attempts in total
pub const MAX_LLM_RETRIES: u32 = 2;

fn default_max_retries() -> u32 {
    2
}

fn default_usage_threshold() -> u8 {
    50
}

fn default_complete_threshold() -> u8 {
    50
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            internal_base_url: default_internal_base_url(),
            shared_secret: None,
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
            policy: PolicyConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            timeout_ms: default_llm_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            usage_threshold_percent: default_usage_threshold(),
            complete_threshold_percent: default_complete_threshold(),
        }
    }
}

impl TomlConfig {
    /// Load configuration from the resolved file (if any) and apply env overrides
    ///
    /// Returns the file that was read, or `None` for compiled defaults. The
    /// caller reports the source, since this usually runs before tracing
    /// is initialized.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let source = resolve_config_path(cli_path)?;
        let mut config = match &source {
            Some(path) => load_toml_config(path)?,
            None => TomlConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok((config, source))
    }

    /// Apply `CVR_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(ENV_SHARED_SECRET) {
            self.shared_secret = Some(secret);
        }
        if let Ok(path) = std::env::var(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(key) = std::env::var(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(key);
        }
        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            self.bind_addr = addr;
        }
    }

    /// The shared secret, treating blank values as unconfigured
    pub fn effective_shared_secret(&self) -> Option<&str> {
        self.shared_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Reject values no service can run with
    pub fn validate(&self) -> Result<()> {
        if self.policy.usage_threshold_percent > 100 {
            return Err(Error::Config(format!(
                "usage_threshold_percent must be 0-100, got {}",
                self.policy.usage_threshold_percent
            )));
        }
        if self.policy.complete_threshold_percent > 100 {
            return Err(Error::Config(format!(
                "complete_threshold_percent must be 0-100, got {}",
                self.policy.complete_threshold_percent
            )));
        }
        if self.llm.max_retries > MAX_LLM_RETRIES {
            return Err(Error::Config(format!(
                "llm.max_retries must be at most {}, got {}",
                MAX_LLM_RETRIES, self.llm.max_retries
            )));
        }
        if self.llm.timeout_ms == 0 {
            return Err(Error::Config("llm.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Resolve which config file to read
///
/// 1. Explicit path (must exist)
/// 2. `CVR_CONFIG` environment variable (must exist)
/// 3. `~/.config/cvr/finalizer.toml`
/// 4. `/etc/cvr/finalizer.toml`
pub fn resolve_config_path(cli_path: Option<&Path>) -> Result<Option<PathBuf>> {
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("cvr").join("finalizer.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let system_config = PathBuf::from("/etc/cvr/finalizer.toml");
    if system_config.exists() {
        return Ok(Some(system_config));
    }

    Ok(None)
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}
