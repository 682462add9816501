//! Logging setup with journald support on Linux.
//!
//! Events go to the systemd journal when it is reachable, otherwise to a
//! daily rolling file.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "CONFLUX_LOG";

/// Target of the per-record decision events.
const DECISION_TARGET: &str = "conflux::aggregation";

/// Filter directives for `config`: dependencies at `warn`, conflux at the
/// configured level, and decisions at `debug` when requested.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = match config.level.trim() {
        "" => "info",
        level => level,
    };
    let mut directives = format!("warn,conflux={}", level);
    if config.decisions {
        directives.push_str(&format!(",{}=debug", DECISION_TARGET));
    }
    directives
}

/// Initialize the logging system.
///
/// `CONFLUX_LOG` replaces the configured filter when set, e.g.
/// `CONFLUX_LOG=conflux::aggregation=trace`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config))?,
    };

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer.with_syslog_identifier("conflux".to_string()))
                .init();

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = config.dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conflux")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "conflux.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer stops flushing once the guard drops.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!(dir = %log_dir.display(), "Logging initialized with file backend");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(filter_directives(&LoggingConfig::default()), "warn,conflux=info");
    }

    #[test]
    fn test_decisions_raise_aggregation_target() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            decisions: true,
            ..LoggingConfig::default()
        };
        let directives = filter_directives(&config);
        assert_eq!(directives, "warn,conflux=warn,conflux::aggregation=debug");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_blank_level_falls_back_to_info() {
        let config = LoggingConfig {
            level: "  ".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directives(&config), "warn,conflux=info");
    }

    #[test]
    fn test_bad_level_is_rejected() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(EnvFilter::try_new(filter_directives(&config)).is_err());
    }
}
