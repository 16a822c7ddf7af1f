//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// TOML-backed file configuration for rankfetch defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub batch: BatchSection,
}

/// `[api]` - where and how to reach the ranking endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub application_id: Option<String>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Whole-request timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Highest page the endpoint serves.
    pub max_pages: Option<u32>,
}

/// `[retry]` - backoff policy for each page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: Option<u8>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub jitter: Option<bool>,
}

/// `[batch]` - page plan and partial-success policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    pub max_items: Option<u64>,
    pub page_size: Option<u32>,
    pub min_success_rate: Option<f64>,
    pub max_consecutive_errors: Option<u32>,
    pub stop_on_fatal_error: Option<bool>,
    /// Minimum delay between requests in milliseconds.
    pub rate_limit: Option<u64>,
    pub concurrency: Option<u8>,
    /// Roll the reported error counters over every this many seconds.
    pub metrics_window_secs: Option<u64>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("api.connect_timeout_secs", self.api.connect_timeout_secs)?;
        validate_timeout_secs("api.read_timeout_secs", self.api.read_timeout_secs)?;
        if self.api.max_pages == Some(0) {
            bail!("Invalid config value for `api.max_pages`: 0. Expected at least 1");
        }

        if let Some(max_retries) = self.retry.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `retry.max_retries`: {max_retries}. Expected range: 0..=10");
        }
        if let Some(max_delay) = self.retry.max_delay_ms
            && max_delay > 600_000
        {
            bail!("Invalid config value for `retry.max_delay_ms`: {max_delay}. Expected range: 0..=600000");
        }
        if let Some(factor) = self.retry.backoff_factor
            && !(1.0..=10.0).contains(&factor)
        {
            bail!("Invalid config value for `retry.backoff_factor`: {factor}. Expected range: 1.0..=10.0");
        }

        if self.batch.max_items == Some(0) {
            bail!("Invalid config value for `batch.max_items`: 0. Expected at least 1");
        }
        if let Some(page_size) = self.batch.page_size
            && !(1..=1000).contains(&page_size)
        {
            bail!("Invalid config value for `batch.page_size`: {page_size}. Expected range: 1..=1000");
        }
        if let Some(rate) = self.batch.min_success_rate
            && !(0.0..=1.0).contains(&rate)
        {
            bail!("Invalid config value for `batch.min_success_rate`: {rate}. Expected range: 0.0..=1.0");
        }
        if self.batch.max_consecutive_errors == Some(0) {
            bail!("Invalid config value for `batch.max_consecutive_errors`: 0. Expected at least 1");
        }
        if let Some(rate_limit) = self.batch.rate_limit
            && rate_limit > 60_000
        {
            bail!("Invalid config value for `batch.rate_limit`: {rate_limit}. Expected range: 0..=60000");
        }
        if self.batch.metrics_window_secs == Some(0) {
            bail!("Invalid config value for `batch.metrics_window_secs`: 0. Expected at least 1");
        }
        if let Some(concurrency) = self.batch.concurrency
            && !(1..=16).contains(&concurrency)
        {
            bail!("Invalid config value for `batch.concurrency`: {concurrency}. Expected range: 1..=16");
        }

        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/rankfetch/config.toml`
/// 2. `$HOME/.config/rankfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("rankfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("rankfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from an explicit path, or from the default path if present.
///
/// An explicit path must exist; a missing default file is not an error.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}
