//! Command-line interface.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use geogram_bt_core::{ConfigResult, DaemonConfig};

/// Geogram Bluetooth auto-pairing daemon.
#[derive(Debug, Parser)]
#[command(name = "geogram-btd")]
#[command(about = "Geogram Bluetooth Auto-Pairing Daemon")]
#[command(version)]
pub struct Cli {
    /// Local callsign; the adapter advertises "Geogram-<CALLSIGN>" [default: TEST01]
    #[arg(short, long)]
    pub callsign: Option<String>,

    /// Stop after the test duration (10 seconds by default)
    #[arg(short, long)]
    pub test: bool,

    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Load the configuration file and environment, then apply flags.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or the result is invalid.
    pub fn load_config(&self) -> ConfigResult<DaemonConfig> {
        self.load_config_with_env(None)
    }

    /// Like [`Cli::load_config`], reading environment overrides from `env`
    /// instead of the process environment when given.
    ///
    /// Flags win over the environment, so validation runs once after both.
    pub fn load_config_with_env(
        &self,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<DaemonConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => DaemonConfig::default_path()?,
        };
        let mut config = DaemonConfig::load_unvalidated(&path, env)?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply flag overrides. Returns whether anything changed.
    pub fn apply_overrides(&self, config: &mut DaemonConfig) -> bool {
        match &self.callsign {
            Some(callsign) => {
                config.callsign.clone_from(callsign);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["geogram-btd"]).unwrap();
        assert_eq!(cli.callsign, None);
        assert!(!cli.test);
        assert!(!cli.debug);

        let mut config = DaemonConfig::default();
        assert!(!cli.apply_overrides(&mut config));
        assert_eq!(config.advertised_name(), "Geogram-TEST01");
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from(["geogram-btd", "-c", "X34PSK", "-t"]).unwrap();
        assert_eq!(cli.callsign.as_deref(), Some("X34PSK"));
        assert!(cli.test);

        let mut config = DaemonConfig::default();
        assert!(cli.apply_overrides(&mut config));
        assert_eq!(config.advertised_name(), "Geogram-X34PSK");
    }

    #[test]
    fn test_long_flags() {
        let cli = Cli::try_parse_from([
            "geogram-btd",
            "--callsign",
            "ABCD",
            "--test",
            "--config",
            "/tmp/bt.toml",
            "--debug",
        ])
        .unwrap();
        assert_eq!(cli.callsign.as_deref(), Some("ABCD"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bt.toml")));
        assert!(cli.debug);
    }

    #[test]
    fn test_load_config_applies_and_validates_callsign() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bt.toml");
        std::fs::write(&path, "scan_interval_secs = 45\n").unwrap();
        let path = path.to_string_lossy().into_owned();

        let cli = Cli::try_parse_from(["geogram-btd", "--config", &path, "-c", "N0CALL"]).unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.callsign, "N0CALL");
        assert_eq!(config.scan_interval_secs, 45);

        let cli = Cli::try_parse_from(["geogram-btd", "--config", &path, "-c", "bad name"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_callsign_flag_overrides_bad_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml").to_string_lossy().into_owned();
        let env = || {
            Some(HashMap::from([(
                "GEOGRAM_BT_CALLSIGN".to_string(),
                "bad name".to_string(),
            )]))
        };

        let cli = Cli::try_parse_from(["geogram-btd", "--config", &path, "-c", "GOOD01"]).unwrap();
        let config = cli.load_config_with_env(env()).unwrap();
        assert_eq!(config.callsign, "GOOD01");

        let cli = Cli::try_parse_from(["geogram-btd", "--config", &path]).unwrap();
        assert!(cli.load_config_with_env(env()).is_err());
    }
}
