//! Tracing subscriber setup.

use bloom_core::{BloomResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "bloom_engine=info,bloom_storage=info,warn";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Subscriber settings, normally read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TracingConfig {
    /// `BLOOM_LOG`, then `RUST_LOG`, for the filter; `BLOOM_LOG_FORMAT=json`
    /// for JSON lines.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let filter = lookup("BLOOM_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let format = match lookup("BLOOM_LOG_FORMAT") {
            Some(s) if s.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self { filter, format }
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// `ConfigError::InvalidValue` for unparseable filter directives, and
/// `ConfigError::TelemetryInit` if a global subscriber is already set.
pub fn init_tracing(config: &TracingConfig) -> BloomResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "BLOOM_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let json = config.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .try_init()
        .map_err(|e| ConfigError::TelemetryInit {
            reason: e.to_string(),
        })?;

    tracing::info!(filter = %config.filter, format = ?config.format, "Tracing initialized");

    Ok(())
}
