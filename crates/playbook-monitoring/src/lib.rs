//! Observability setup shared by the Playbook sync binaries and tests.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

pub mod logging;

pub use logging::{init_logging, init_test_tracing, LogExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output for development
    #[default]
    Pretty,
    /// One JSON object per event for log aggregation
    Json,
}

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset (e.g., "info,playbook_core=debug")
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Emit span open/close events
    pub log_span_events: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "playbook-sync".to_string(),
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_span_events: false,
        }
    }
}

impl MonitoringConfig {
    /// Defaults overridden by `PLAYBOOK_LOG_FILTER`, `PLAYBOOK_LOG_FORMAT`
    /// and `PLAYBOOK_LOG_SPANS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(filter) = env::var("PLAYBOOK_LOG_FILTER") {
            config.log_filter = filter;
        }

        if let Ok(format) = env::var("PLAYBOOK_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => config.log_format = LogFormat::Json,
                "pretty" => config.log_format = LogFormat::Pretty,
                _ => warn!("Invalid PLAYBOOK_LOG_FORMAT value: {}", format),
            }
        }

        if let Ok(spans) = env::var("PLAYBOOK_LOG_SPANS") {
            config.log_span_events = spans.to_lowercase() == "true" || spans == "1";
        }

        config
    }

    /// Same configuration with another service name
    pub fn for_service(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}
