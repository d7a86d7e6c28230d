//! Console logging setup
//!
//! Everything goes to stderr. `RUST_LOG` wins over the configured level when set.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Unknown names fall back to `INFO`.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

fn is_json(format: &str) -> bool {
    format.trim().eq_ignore_ascii_case("json")
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init_logging(settings: &LoggingSettings) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(parse_level(&settings.level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    if is_json(&settings.format) {
        builder.json().init();
    } else {
        builder.init();
    }
}
