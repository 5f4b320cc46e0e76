//! Configuration loader and validator for the forum harvester.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::sanitize::default_noise_fields;

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
pub struct Config {
    pub api: Api,
    pub storage: Storage,
    #[serde(default)]
    pub harvest: Harvest,
}

/// Forum API settings, including the transport's rate-limit and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Api {
    pub base_url: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_per_minute_limit")]
    pub per_minute_limit: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
}

/// Where the SQLite database lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub data_dir: String,
}

/// Harvest defaults: which fields to strip and how far back to start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Harvest {
    #[serde(default = "default_noise_fields")]
    pub noise_fields: Vec<String>,
    #[serde(default = "default_start_date")]
    pub default_start_date: NaiveDate,
}

impl Default for Harvest {
    fn default() -> Self {
        Self {
            noise_fields: default_noise_fields(),
            default_start_date: default_start_date(),
        }
    }
}

fn default_page_limit() -> u32 {
    100
}

fn default_per_minute_limit() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_statuses() -> Vec<u16> {
    vec![504]
}

fn default_backoff_seconds() -> f64 {
    0.5
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2014, 1, 1).expect("valid default start date")
}

impl Config {
    /// Ensure required directories exist (creates `storage.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.storage.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.storage.data_dir)
    }

    /// SQLite URL for the harvest database inside `storage.data_dir`.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/forum.db",
            self.storage.data_dir.trim_end_matches('/')
        )
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
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    if !cfg.api.base_url.ends_with('/') {
        return Err(ConfigError::Invalid("api.base_url must end with '/'"));
    }
    if cfg.api.page_limit == 0 {
        return Err(ConfigError::Invalid("api.page_limit must be > 0"));
    }
    if cfg.api.per_minute_limit == 0 {
        return Err(ConfigError::Invalid("api.per_minute_limit must be > 0"));
    }
    if cfg.api.backoff_seconds < 0.0 {
        return Err(ConfigError::Invalid("api.backoff_seconds must be >= 0"));
    }
    if cfg.storage.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.data_dir must be non-empty"));
    }
    Ok(())
}

/// Example YAML config, also used by tests as a known-good baseline.
pub fn example() -> &'static str {
    r#"api:
  base_url: "https://forums.elderscrollsonline.com/api/v2/"
  page_limit: 100
  per_minute_limit: 100
  max_retries: 10
  retry_statuses:
    - 504
  backoff_seconds: 0.5

storage:
  data_dir: "./data"

harvest:
  noise_fields:
    - image
    - insertUser
    - attributes
  default_start_date: 2014-01-01
"#
}
