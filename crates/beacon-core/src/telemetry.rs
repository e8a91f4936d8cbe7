//! Telemetry bootstrap
//!
//! Wires up `tracing-subscriber` for structured logs. Registry
//! components only emit through `tracing`; whether those events go
//! anywhere is decided once, here, by the embedding process.

use tracing_subscriber::EnvFilter;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to emitted events
    pub service_name: String,
    /// Log level filter (tracing env-filter syntax)
    pub log_level: String,
    /// Emit compact single-line output instead of the default format
    pub compact: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "beacon".to_string(),
            log_level: "info".to_string(),
            compact: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Create from environment variables
    ///
    /// Reads `BEACON_SERVICE_NAME` (default: "beacon") and `RUST_LOG`
    /// (default: "info").
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("BEACON_SERVICE_NAME").unwrap_or_else(|_| "beacon".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            service_name,
            log_level,
            compact: false,
        }
    }
}

/// Install the global tracing subscriber
///
/// Safe to call more than once; later calls are no-ops because the
/// global subscriber can only be set once per process.
pub fn init(config: &TelemetryConfig) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.compact {
        builder.compact().try_init()
    } else {
        builder.try_init()
    };

    if result.is_ok() {
        tracing::debug!(service = %config.service_name, "telemetry initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "beacon");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_config_builder() {
        let config = TelemetryConfig::new("my-service").with_log_level("debug");
        assert_eq!(config.service_name, "my-service");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TelemetryConfig::default();
        init(&config);
        init(&config); // second call must not panic
    }
}
