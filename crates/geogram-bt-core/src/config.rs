//! Daemon configuration management.
//!
//! Settings are layered, later layers winning:
//! - built-in defaults
//! - an optional TOML file (`/etc/geogram/bt.toml` on Linux)
//! - `GEOGRAM_BT_*` environment variables (`__` separates nested keys,
//!   e.g. `GEOGRAM_BT_LOGGING__LEVEL=debug`)
//! - command-line overrides applied by the binary
//!
//! Validation collects every problem instead of stopping at the first one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix every Geogram device advertises before its callsign.
pub const DEFAULT_NAME_PREFIX: &str = "Geogram-";

/// Callsign used when none is configured.
pub const DEFAULT_CALLSIGN: &str = "TEST01";

/// Longest advertised name BlueZ accepts, in bytes.
pub const MAX_ADVERTISED_NAME_LEN: usize = 248;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "GEOGRAM_BT";

static CALLSIGN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("callsign regex is valid"));

/// Returns `true` if `callsign` only uses characters safe in an advertised name.
#[must_use]
pub fn is_valid_callsign(callsign: &str) -> bool {
    CALLSIGN_REGEX.is_match(callsign)
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The effective configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No platform configuration directory exists.
    #[error("cannot determine configuration directory")]
    NoConfigDir,

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    Validation {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} invalid configuration values", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Logging settings consumed by the daemon binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON rolling files plus plain stdout instead of pretty stdout.
    pub production: bool,

    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Directory for rolling log files (production only).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            production: false,
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Auto-pairing daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Local callsign; the adapter advertises `name_prefix + callsign`.
    pub callsign: String,

    /// Naming convention prefix shared by all Geogram devices.
    pub name_prefix: String,

    /// Seconds between discovery scans.
    pub scan_interval_secs: u64,

    /// Seconds discovery stays on per scan.
    pub scan_duration_secs: u64,

    /// Seconds between status reports.
    pub status_interval_secs: u64,

    /// Run length in test mode.
    pub test_duration_secs: u64,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            callsign: DEFAULT_CALLSIGN.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            scan_interval_secs: 30,
            scan_duration_secs: 5,
            status_interval_secs: 60,
            test_duration_secs: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path` (if it exists) and the process
    /// environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`DaemonConfig::load`], reading environment overrides from `env`
    /// instead of the process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or validation fails.
    pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> ConfigResult<Self> {
        let config = Self::load_unvalidated(path, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge the file and environment layers without validating, so callers
    /// can apply their own overrides before [`DaemonConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed.
    pub fn load_unvalidated(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Platform default location of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] when no config directory exists.
    pub fn default_path() -> ConfigResult<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/geogram/bt.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "geogram-bt")
                .ok_or(ConfigError::NoConfigDir)?;
            Ok(dirs.config_dir().join("bt.toml"))
        }
    }

    /// Name the local adapter advertises.
    #[must_use]
    pub fn advertised_name(&self) -> String {
        format!("{}{}", self.name_prefix, self.callsign)
    }

    /// Interval between discovery scans.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// How long discovery stays on per scan.
    #[must_use]
    pub const fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    /// Interval between status reports.
    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Run length in test mode.
    #[must_use]
    pub const fn test_duration(&self) -> Duration {
        Duration::from_secs(self.test_duration_secs)
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::Validation`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !is_valid_callsign(&self.callsign) {
            errors.push(ConfigError::Validation {
                field: "callsign",
                message: format!(
                    "'{}' must be non-empty and use only letters, digits, '-' or '_'",
                    self.callsign
                ),
            });
        }

        if self.name_prefix.is_empty() {
            errors.push(ConfigError::Validation {
                field: "name_prefix",
                message: "must not be empty".to_string(),
            });
        }

        let name_len = self.advertised_name().len();
        if name_len > MAX_ADVERTISED_NAME_LEN {
            errors.push(ConfigError::Validation {
                field: "callsign",
                message: format!(
                    "advertised name is {name_len} bytes, limit is {MAX_ADVERTISED_NAME_LEN}"
                ),
            });
        }

        for (field, value) in [
            ("scan_interval_secs", self.scan_interval_secs),
            ("scan_duration_secs", self.scan_duration_secs),
            ("status_interval_secs", self.status_interval_secs),
            ("test_duration_secs", self.test_duration_secs),
        ] {
            if value == 0 {
                errors.push(ConfigError::Validation {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.scan_duration_secs >= self.scan_interval_secs {
            errors.push(ConfigError::Validation {
                field: "scan_duration_secs",
                message: format!(
                    "must be shorter than scan_interval_secs ({})",
                    self.scan_interval_secs
                ),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> Option<HashMap<String, String>> {
        Some(HashMap::new())
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.advertised_name(), "Geogram-TEST01");
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.scan_duration(), Duration::from_secs(5));
        assert_eq!(config.status_interval(), Duration::from_secs(60));
        assert_eq!(config.test_duration(), Duration::from_secs(10));
    }

    #[test]
    fn test_is_valid_callsign() {
        assert!(is_valid_callsign("X34PSK"));
        assert!(is_valid_callsign("node_1-b"));
        assert!(!is_valid_callsign(""));
        assert!(!is_valid_callsign("has space"));
        assert!(!is_valid_callsign("emoji🙂"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_with_env(&dir.path().join("absent.toml"), no_env()).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "callsign = \"X34PSK\"\nscan_interval_secs = 45\n\n[logging]\nproduction = true"
        )
        .unwrap();

        let config = DaemonConfig::load_with_env(file.path(), no_env()).unwrap();
        assert_eq!(config.callsign, "X34PSK");
        assert_eq!(config.scan_interval_secs, 45);
        assert_eq!(config.scan_duration_secs, 5);
        assert!(config.logging.production);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "callsign = \"FROMFILE\"").unwrap();

        let env = HashMap::from([
            ("GEOGRAM_BT_CALLSIGN".to_string(), "FROMENV".to_string()),
            ("GEOGRAM_BT_STATUS_INTERVAL_SECS".to_string(), "120".to_string()),
            ("GEOGRAM_BT_LOGGING__LEVEL".to_string(), "debug".to_string()),
        ]);

        let config = DaemonConfig::load_with_env(file.path(), Some(env)).unwrap();
        assert_eq!(config.callsign, "FROMENV");
        assert_eq!(config.status_interval_secs, 120);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "callsign = \"bad callsign\"").unwrap();

        let result = DaemonConfig::load_with_env(file.path(), no_env());
        assert!(matches!(
            result,
            Err(ConfigError::Validation {
                field: "callsign",
                ..
            })
        ));
    }

    #[test]
    fn test_unvalidated_load_defers_validation() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([("GEOGRAM_BT_CALLSIGN".to_string(), "bad name".to_string())]);
        let path = dir.path().join("absent.toml");

        assert!(DaemonConfig::load_with_env(&path, Some(env.clone())).is_err());

        let mut config = DaemonConfig::load_unvalidated(&path, Some(env)).unwrap();
        assert_eq!(config.callsign, "bad name");
        config.callsign = "GOOD01".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = DaemonConfig {
            callsign: String::new(),
            name_prefix: String::new(),
            scan_interval_secs: 0,
            ..DaemonConfig::default()
        };

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => {
                // callsign, name_prefix, scan_interval_secs, scan_duration_secs
                assert_eq!(errors.len(), 4);
            }
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_advertised_name_length_limit() {
        let config = DaemonConfig {
            callsign: "A".repeat(MAX_ADVERTISED_NAME_LEN),
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "callsign",
                ..
            })
        ));
    }

    #[test]
    fn test_to_toml_round_trips_through_loader() {
        let config = DaemonConfig {
            callsign: "X34PSK".to_string(),
            ..DaemonConfig::default()
        };
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("callsign = \"X34PSK\""));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
        let loaded = DaemonConfig::load_with_env(file.path(), no_env()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_error_converts_to_bt_error() {
        let err: crate::BtError = ConfigError::Validation {
            field: "callsign",
            message: "bad".into(),
        }
        .into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("callsign: bad"));
    }
}
