//! Configuration layer: typed settings with layered precedence (file → env).

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use time::Duration;

const DEFAULT_CONFIG_BASENAME: &str = "chirp";
const ENV_PREFIX: &str = "CHIRP";

const DEFAULT_QUERY_STALE_SECS: u64 = 0;
const DEFAULT_PAGE_REVALIDATE_SECS: u64 = 0;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing directive, overridable via `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Synchronization core settings from `chirp.toml` / `CHIRP_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds before a Success cache entry is considered stale.
    /// 0 disables time-based staleness: entries stay fresh until invalidated.
    pub query_stale_secs: u64,
    /// Seconds before a Fresh page snapshot is due for background
    /// regeneration. 0 disables the timer: pages stay fresh until an
    /// explicit revalidation signal marks them stale.
    pub page_revalidate_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            query_stale_secs: DEFAULT_QUERY_STALE_SECS,
            page_revalidate_secs: DEFAULT_PAGE_REVALIDATE_SECS,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load settings: `chirp.toml` (optional) overlaid by `CHIRP_*` env vars.
    pub fn load() -> Result<Self, SettingsError> {
        let settings = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn query_stale_after(&self) -> Option<Duration> {
        (self.query_stale_secs > 0).then(|| Duration::seconds(self.query_stale_secs as i64))
    }

    pub fn page_revalidate_after(&self) -> Option<Duration> {
        (self.page_revalidate_secs > 0).then(|| Duration::seconds(self.page_revalidate_secs as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_time_based_staleness() {
        let config = SyncConfig::default();
        assert!(config.query_stale_after().is_none());
        assert!(config.page_revalidate_after().is_none());
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn windows_map_to_durations() {
        let config = SyncConfig {
            query_stale_secs: 30,
            page_revalidate_secs: 60,
            ..Default::default()
        };
        assert_eq!(config.query_stale_after(), Some(Duration::seconds(30)));
        assert_eq!(config.page_revalidate_after(), Some(Duration::seconds(60)));
    }

    #[test]
    fn log_format_deserializes_lowercase() {
        let logging: LoggingConfig =
            serde_json::from_value(serde_json::json!({"level": "debug", "format": "json"}))
                .expect("logging config deserializes");
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(logging.level, "debug");
    }
}
