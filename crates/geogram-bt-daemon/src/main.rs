//! # geogram-btd
//!
//! Auto-pairing daemon for Geogram devices.
//!
//! This binary:
//! - Advertises the local adapter as `Geogram-<callsign>`
//! - Registers an agent that accepts every pairing request
//! - Pairs, trusts and connects every nearby Geogram peer it sees
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package geogram-bt-daemon -- --callsign X34PSK --test
//!
//! # Production (on the device)
//! ./geogram-btd --callsign X34PSK
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use geogram_bt_core::{
    install_signal_handlers, BluezBackend, BtError, Coordinator, CoordinatorSettings,
    DaemonConfig, NamingConvention, StopHandle,
};
use tracing::{error, info};

mod cli;
mod logging;

use cli::Cli;

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("enable the `bluetooth` or `mock-bluetooth` feature");

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::from(BtError::from(err).exit_code());
        }
    };

    if cli.print_config {
        return match config.to_toml() {
            Ok(rendered) => {
                print!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("Error: {err}");
                ExitCode::from(BtError::from(err).exit_code())
            }
        };
    }

    if let Err(err) = logging::init(&config.logging, cli.debug) {
        eprintln!("Error: failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

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

    match runtime.block_on(run(config, cli.test)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            if let Some(hint) = failure_hint(&err) {
                error!("{}", hint);
            }
            let code = err
                .downcast_ref::<BtError>()
                .map_or(1, BtError::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Extra advice for failures the operator can fix on the host.
fn failure_hint(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<BtError>()
        .filter(|bt| bt.is_adapter_error())
        .map(|_| "Check that bluetoothd is running and an adapter is present (bluetoothctl list)")
}

async fn run(config: DaemonConfig, test_mode: bool) -> anyhow::Result<()> {
    info!("  Callsign: {}", config.callsign);
    if test_mode {
        info!("  Test mode: stopping after {}s", config.test_duration_secs);
    }

    let stop = StopHandle::new();
    install_signal_handlers(stop.clone()).context("failed to install signal handlers")?;

    let backend = open_backend().await?;
    run_coordinator(backend, &config, test_mode, stop).await
}

async fn run_coordinator<B: BluezBackend>(
    backend: B,
    config: &DaemonConfig,
    test_mode: bool,
    stop: StopHandle,
) -> anyhow::Result<()> {
    let mut coordinator = Coordinator::new(
        backend,
        NamingConvention::new(config.name_prefix.clone(), &config.callsign),
        CoordinatorSettings::from_config(config, test_mode),
        stop,
    );
    coordinator.run().await?;
    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_hint_only_for_adapter_errors() {
        assert!(failure_hint(&anyhow::Error::from(BtError::AdapterNotFound)).is_some());
        assert!(failure_hint(&anyhow::Error::from(BtError::SessionInitFailed(
            "org.freedesktop.DBus.Error.ServiceUnknown".to_string()
        )))
        .is_some());
        assert!(failure_hint(&anyhow::Error::from(BtError::DeviceNotFound(
            "AA:BB:CC:DD:EE:FF".to_string()
        )))
        .is_none());
        assert!(failure_hint(&anyhow::anyhow!("failed to install signal handlers")).is_none());
    }
}
