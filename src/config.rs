//! ==============================================================================
//! config.rs - Feed Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `feed.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - TransportConfig: Where the telemetry backend lives.
//!     - PollingConfig: How often every sensor is refreshed after start.
//!     - RetryConfig: Attempt budget and backoff per refresh.
//!     - LogsConfig: Historical chart window.
//!     - LoggingConfig / ServerConfig: Binary-only concerns.
//!
//! ==============================================================================

use crate::cache::RetryPolicy;
use crate::feed::FeedOptions;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FeedConfig {
    pub transport: TransportConfig,
    pub polling: PollingConfig,
    pub retry: RetryConfig,
    pub logs: LogsConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    /// 0 = refresh once on start, then only on request
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogsConfig {
    pub enabled: bool,
    pub window_hours: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_hours: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: FeedConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("feed.toml"),
            PathBuf::from("..").join("config").join("feed.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("[CONFIG] Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        warn!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.transport.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        match self.polling.interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.backoff_ms),
        )
    }

    /// log window in hours; 0 would mean "latest value", so it is bumped to 1
    pub fn log_window(&self) -> Option<NonZeroU32> {
        if !self.logs.enabled {
            return None;
        }
        NonZeroU32::new(self.logs.window_hours).or_else(|| {
            warn!("[CONFIG] logs.window_hours = 0 is not a window, using 1");
            NonZeroU32::new(1)
        })
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            retry: self.retry_policy(),
            log_window: self.log_window(),
        }
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        info!("Backend: {}", self.transport.base_url);
        info!(
            "Poll interval: {}",
            match self.poll_interval() {
                Some(d) => format!("{}s", d.as_secs()),
                None => "manual".to_string(),
            }
        );
        info!(
            "Retry: {} attempts, {}ms backoff",
            self.retry_policy().max_attempts,
            self.retry.backoff_ms
        );
        match self.log_window() {
            Some(h) => info!("Charts: last {}h", h),
            None => info!("Charts: disabled"),
        }
        info!("Log level: {}", self.logging.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.log_window(), NonZeroU32::new(1));
        assert!(config.server.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = FeedConfig::parse(
            r#"
            [transport]
            base_url = "http://sensors.local/api"

            [retry]
            backoff_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.base_url, "http://sensors.local/api");
        assert_eq!(config.transport.timeout_seconds, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(3, Duration::from_millis(250))
        );
    }

    #[test]
    fn test_zero_values() {
        let config = FeedConfig::parse(
            r#"
            [polling]
            interval_seconds = 0

            [logs]
            window_hours = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), None);
        assert_eq!(config.log_window(), NonZeroU32::new(1));

        let config = FeedConfig::parse("[logs]\nenabled = false\n").unwrap();
        assert_eq!(config.log_window(), None);
        assert_eq!(config.feed_options().log_window, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logs]\nwindow_hours = 24\n\n[server]\nenabled = false").unwrap();

        let config = FeedConfig::load(file.path()).unwrap();
        assert_eq!(config.log_window(), NonZeroU32::new(24));
        assert!(!config.server.enabled);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        assert!(FeedConfig::load("/nonexistent/feed.toml").is_err());
        assert!(FeedConfig::parse("[retry]\nmax_attempts = \"three\"").is_err());
    }
}
