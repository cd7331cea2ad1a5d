//! Tracing subscriber bootstrap for Quorra binaries.
//!
//! Output goes to stderr: a worker's stdout may be captured by whoever
//! launched it. `QUORRA_LOG` (then `RUST_LOG`) overrides the configured level.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV_VAR: &str = "QUORRA_LOG";

/// Build the filter from the environment, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    std::env::var(LOG_ENV_VAR)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| {
            EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
        })
}

/// Install the global subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(default_level: &str, json: bool) {
    let filter = env_filter(default_level);
    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
