//! Tracing subscriber setup

use crate::error::{RunnerError, RunnerResult};
use spindle_core::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: [&str; 2] = ["spindle_core", "spindle_runner"];

/// Build the filter. `RUST_LOG` wins when set; otherwise the Spindle crates
/// log at the configured level and everything else at `error`.
pub fn env_filter(config: &LoggingConfig) -> RunnerResult<EnvFilter> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(config, rust_log.as_deref())
}

fn filter_from(config: &LoggingConfig, rust_log: Option<&str>) -> RunnerResult<EnvFilter> {
    let directives = match rust_log.filter(|v| !v.trim().is_empty()) {
        Some(directives) => directives.to_string(),
        None => CRATES.iter().fold("error".to_string(), |acc, krate| {
            format!("{},{}={}", acc, krate, config.level.as_str())
        }),
    };

    EnvFilter::try_new(&directives).map_err(|e| {
        RunnerError::Logging(format!("Invalid log directives '{}': {}", directives, e))
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> RunnerResult<()> {
    let filter = env_filter(config)?;

    let result = if config.pretty {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().compact())
            .with(filter)
            .try_init()
    };

    result.map_err(|e| RunnerError::Logging(e.to_string()))
}
