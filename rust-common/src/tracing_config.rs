//! Tracing subscriber set-up for plugin processes.
//!
//! Plugins log through `tracing` and never install a subscriber
//! themselves; the hosting binary (or a test harness) does it once through
//! this module. `RUST_LOG`, when set, overrides the configured level.

use std::env;

use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the output format (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "PLUGIN_LOG_FORMAT";

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

impl LogFormat {
    /// Parse `json`/`text`, case-insensitively. Anything else is `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "text" | "pretty" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Subscriber settings for one plugin process.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Plugin name recorded on the start-up event
    pub plugin_name: String,
    /// Default filter directive, e.g. `info` or `clickhouse_credentials=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            plugin_name: "database-plugin".to_string(),
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl TracingConfig {
    /// Defaults, with the format taken from [`LOG_FORMAT_ENV`] if it holds
    /// a recognised value.
    #[must_use]
    pub fn from_env() -> Self {
        let format = env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Self {
            format,
            ..Self::default()
        }
    }

    /// Set the plugin name.
    #[must_use]
    pub fn with_plugin_name(mut self, name: impl Into<String>) -> Self {
        self.plugin_name = name.into();
        self
    }

    /// Set the default filter directive.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    fn layer(&self, test_writer: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
        let fmt = tracing_subscriber::fmt::layer().with_target(true);
        match (self.format, test_writer) {
            (LogFormat::Json, true) => fmt.json().with_test_writer().boxed(),
            (LogFormat::Json, false) => fmt.json().boxed(),
            (LogFormat::Text, true) => fmt.with_test_writer().boxed(),
            (LogFormat::Text, false) => fmt.boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Call once at process start-up. Panics if a global subscriber is already
/// installed.
pub fn init_tracing(config: &TracingConfig) {
    tracing_subscriber::registry()
        .with(config.layer(false))
        .with(config.filter())
        .init();
    tracing::debug!(plugin = %config.plugin_name, format = ?config.format, "Tracing initialized");
}

/// Like [`init_tracing`], but writes through the test harness's capture and
/// tolerates an already-installed subscriber.
///
/// Returns `true` when this call installed the subscriber.
pub fn try_init_tracing(config: &TracingConfig) -> bool {
    tracing_subscriber::registry()
        .with(config.layer(true))
        .with(config.filter())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.plugin_name, "database-plugin");
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::default()
            .with_plugin_name("clickhouse")
            .with_log_level("clickhouse_credentials=debug")
            .with_format(LogFormat::Json);

        assert_eq!(config.plugin_name, "clickhouse");
        assert_eq!(config.level, "clickhouse_credentials=debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" text "), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let config = TracingConfig::default().with_log_level("warn");
        let _ = try_init_tracing(&config);
        assert!(!try_init_tracing(&config));
    }
}
