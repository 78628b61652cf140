//! Logging setup for hosts embedding the indexer

use serde::Serialize;
use std::sync::Once;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    #[serde(skip_serializing)]
    pub default_level: Level,
    /// Whether to include target/module
    pub include_target: bool,
    pub use_ansi: bool,
    /// Extra directives appended to the filter, e.g. `tessera_sqlite=trace`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_target: true,
            use_ansi: true,
            filter: None,
        }
    }
}

/// Install the global fmt subscriber once; later calls are no-ops
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(build_filter_string(&config)));

        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.include_target)
            .with_ansi(config.use_ansi)
            .try_init();

        if installed.is_ok() {
            info!(level = %config.default_level, "Logging initialized");
        }
    });
}

/// Filter directives for the tessera crates at the configured level
pub fn build_filter_string(config: &LoggingConfig) -> String {
    let level = config.default_level.to_string().to_lowercase();
    let mut filter = format!("warn,tessera={level}");
    for krate in [
        "tessera_core",
        "tessera_config",
        "tessera_blocktree",
        "tessera_sqlite",
        "tessera_indexer",
    ] {
        filter.push_str(&format!(",{krate}={level}"));
    }
    if let Some(extra) = &config.filter {
        filter.push(',');
        filter.push_str(extra);
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string() {
        let config = LoggingConfig {
            default_level: Level::DEBUG,
            filter: Some("tessera_sqlite=trace".into()),
            ..Default::default()
        };
        let filter = build_filter_string(&config);
        assert!(filter.starts_with("warn,tessera=debug"));
        assert!(filter.contains("tessera_blocktree=debug"));
        assert!(filter.ends_with(",tessera_sqlite=trace"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig::default());
    }
}
