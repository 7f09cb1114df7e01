//! Logging setup
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate only. `format = "json"` switches to one JSON object per line.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_directive(&config.level)),
    );

    let (json, pretty) = if is_json(&config.format) {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
}

fn default_directive(level: &str) -> String {
    format!("clinic_sync={}", level.trim().to_ascii_lowercase())
}

fn is_json(format: &str) -> bool {
    format.trim().eq_ignore_ascii_case("json")
}
