//! Geogram Bluetooth agent
//!
//! Registers a pairing agent that accepts every request without user
//! interaction, for headless devices and automated testing.
//!
//! # Usage
//!
//! ```text
//! geogram-bt-agent                  # serve: discoverable, auto-accept until Ctrl+C
//! geogram-bt-agent --pair MAC       # pair with a specific device
//! geogram-bt-agent --scan           # list nearby devices
//! ```
//!
//! # Exit Status
//!
//! - `0`: success
//! - `1`: pairing failed or the device was not found
//! - `2`: invalid command line
//! - `69`: no Bluetooth adapter

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use geogram_bt_core::actions::{self, format_device_line};
use geogram_bt_core::{
    install_signal_handlers, normalize_address, AutoAcceptAgent, BluezBackend, BtError,
    PairOutcome, RetryPolicy, StopHandle, DEFAULT_SCAN_DURATION,
};
use tracing::{error, info};

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("enable the `bluetooth` or `mock-bluetooth` feature");

/// Auto-accepting Bluetooth pairing agent.
#[derive(Debug, Parser)]
#[command(name = "geogram-bt-agent")]
#[command(about = "Bluetooth NoInputNoOutput agent for automated pairing")]
#[command(version)]
struct Cli {
    /// Scan for nearby devices for 10 seconds and list them
    #[arg(long, conflicts_with = "pair")]
    scan: bool,

    /// Pair with the device at ADDRESS (XX:XX:XX:XX:XX:XX)
    #[arg(long, value_name = "ADDRESS", value_parser = parse_address)]
    pair: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// What the agent was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Serve,
    Scan,
    Pair(String),
}

impl Cli {
    fn mode(&self) -> Mode {
        match (&self.pair, self.scan) {
            (Some(address), _) => Mode::Pair(address.clone()),
            (None, true) => Mode::Scan,
            (None, false) => Mode::Serve,
        }
    }
}

fn parse_address(value: &str) -> Result<String, String> {
    normalize_address(value).map_err(|err| err.to_string())
}

/// Initialize logging to stderr so stdout only carries results.
fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run<B: BluezBackend>(backend: B, mode: Mode) -> Result<()> {
    match mode {
        Mode::Serve => {
            let stop = StopHandle::new();
            install_signal_handlers(stop.clone()).context("Failed to install signal handlers")?;
            actions::serve(&backend, &stop).await?;
        }
        Mode::Scan => {
            let devices = actions::scan(&backend, DEFAULT_SCAN_DURATION).await?;
            println!();
            println!("Discovered devices:");
            for device in &devices {
                println!("{}", format_device_line(device));
            }
        }
        Mode::Pair(address) => {
            // Registered first so BlueZ routes our own Pair prompts to it.
            actions::register_agent_quietly(&backend, Arc::new(AutoAcceptAgent::new())).await;

            let outcome = actions::pair(&backend, &address, RetryPolicy::default()).await;
            if let Err(err) = backend.unregister_agent().await {
                tracing::debug!("Unregistering agent: {}", err);
            }
            match outcome? {
                PairOutcome::Paired => println!("Paired with {address}"),
                PairOutcome::AlreadyPaired => println!("{address} already paired"),
            }
        }
    }
    Ok(())
}

async fn start(mode: Mode) -> Result<()> {
    let backend = open_backend().await?;
    run(backend, mode).await
}

#[cfg(feature = "bluetooth")]
async fn open_backend() -> geogram_bt_core::Result<geogram_bt_core::BluerBackend> {
    geogram_bt_core::BluerBackend::connect().await
}

#[cfg(all(feature = "mock-bluetooth", not(feature = "bluetooth")))]
async fn open_backend() -> geogram_bt_core::Result<geogram_bt_core::MockBackend> {
    tracing::warn!("Running against the in-memory mock backend");
    Ok(geogram_bt_core::MockBackend::new())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(start(cli.mode())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            let code = err
                .downcast_ref::<BtError>()
                .map_or(1, BtError::exit_code);
            info!("Exiting with status {}", code);
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_args_serves() {
        let cli = Cli::try_parse_from(["geogram-bt-agent"]).unwrap();
        assert_eq!(cli.mode(), Mode::Serve);
    }

    #[test]
    fn test_scan() {
        let cli = Cli::try_parse_from(["geogram-bt-agent", "--scan"]).unwrap();
        assert_eq!(cli.mode(), Mode::Scan);
    }

    #[test]
    fn test_pair_normalizes_address() {
        let cli = Cli::try_parse_from(["geogram-bt-agent", "--pair", "aa:bb:cc:dd:ee:ff"]).unwrap();
        assert_eq!(cli.mode(), Mode::Pair("AA:BB:CC:DD:EE:FF".to_string()));
    }

    #[test]
    fn test_pair_rejects_bad_address() {
        let err = Cli::try_parse_from(["geogram-bt-agent", "--pair", "AA:BB"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_pair_requires_address() {
        let err = Cli::try_parse_from(["geogram-bt-agent", "--pair"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_scan_and_pair_conflict() {
        let err = Cli::try_parse_from([
            "geogram-bt-agent",
            "--scan",
            "--pair",
            "AA:BB:CC:DD:EE:FF",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = Cli::try_parse_from(["geogram-bt-agent", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }
}
