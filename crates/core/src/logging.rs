//! Structured logging for MapMesh nodes.
//!
//! `RUST_LOG` always wins over the configured level.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize human-readable logging at `info` unless `RUST_LOG` is set.
///
/// # Example
/// ```no_run
/// use mapmesh_core::logging;
///
/// logging::init();
/// tracing::info!("relay started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON-line logging for log aggregation.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging from the `[logging]` section of a node config.
///
/// Returns false when a global subscriber was already installed.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(filter(&config.level));
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_reported() {
        let config = LoggingConfig::default();
        let _ = init_from_config(&config);
        assert!(!init_from_config(&config));
    }
}
