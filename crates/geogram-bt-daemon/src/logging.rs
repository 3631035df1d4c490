//! Logging initialization and configuration.
//!
//! This module provides environment-aware logging setup:
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use geogram_bt_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "GEOGRAM_BT_LOG_LEVEL";

/// Static guards to keep non-blocking writers alive.
/// These must persist for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Pick the filter directive: `--debug` wins, then `GEOGRAM_BT_LOG_LEVEL`,
/// then the configured level. `RUST_LOG` overrides all of them in [`init`].
pub fn resolve_level(config: &LoggingConfig, debug: bool, env_level: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    env_level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

/// Initialize the logging system.
///
/// # Production Mode
///
/// - Logs to rolling daily files in `/var/log/geogram/` (or the configured
///   directory)
/// - Also logs to stdout for systemd journal capture
/// - JSON format in files, compact format without colors on stdout
///
/// # Development Mode
///
/// - Logs to stdout only with pretty formatting
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(config: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
    let level = resolve_level(config, debug, std::env::var(LOG_LEVEL_ENV).ok());

    let env_filter = if debug {
        EnvFilter::try_new(&level)?
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?
    };

    if config.production {
        let log_dir = config
            .directory
            .clone()
            .unwrap_or_else(default_log_directory);
        init_production(env_filter, &log_dir);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// Initialize production logging with file + stdout output.
fn init_production(env_filter: EnvFilter, log_dir: &Path) {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir).ok();
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "geogram-bt");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(false)
        .with_ansi(false); // journald

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

/// Initialize development logging with pretty stdout output.
fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Returns the default log directory for the current platform.
fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/geogram")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "geogram-bt")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_directory_is_valid_path() {
        let dir = default_log_directory();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_resolve_level_precedence() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };

        assert_eq!(resolve_level(&config, false, None), "warn");
        assert_eq!(
            resolve_level(&config, false, Some("trace".to_string())),
            "trace"
        );
        assert_eq!(resolve_level(&config, false, Some("  ".to_string())), "warn");
        assert_eq!(
            resolve_level(&config, true, Some("trace".to_string())),
            "debug"
        );
    }
}
