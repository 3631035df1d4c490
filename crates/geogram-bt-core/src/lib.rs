//! # geogram-bt-core
//!
//! Core logic for unattended Bluetooth pairing between Geogram devices.
//!
//! This crate provides:
//! - An auto-accepting BlueZ pairing agent
//! - Discovery and auto-pairing of peers that follow the Geogram naming
//!   convention
//! - One-shot serve, scan and pair actions
//! - Configuration management for the daemon
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`backend`] - The async trait everything uses to talk to BlueZ
//! - [`bluez`] - The bluer-based BlueZ backend (feature `bluetooth`)
//! - [`agent`] - Pairing agent answering every prompt automatically
//! - [`adapter`] - Adapter power, name and visibility settings
//! - [`coordinator`] - The daemon's discovery and auto-pairing loop
//! - [`peers`] - Naming convention and peer tracking
//! - [`actions`] - Sequential flows behind the agent binary
//! - [`config`] - Daemon configuration loading and validation
//! - [`shutdown`] - Cooperative stop requests and signal handling
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared adapter and device types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod actions;
pub mod adapter;
pub mod agent;
pub mod backend;
#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod config;
pub mod coordinator;
pub mod error;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod peers;
pub mod shutdown;
pub mod types;

// Re-export primary types for convenience
pub use actions::{PairOutcome, RetryPolicy, DEFAULT_SCAN_DURATION};
pub use agent::AutoAcceptAgent;
pub use backend::BluezBackend;
#[cfg(feature = "bluetooth")]
pub use bluez::BluerBackend;
pub use config::{ConfigError, ConfigResult, DaemonConfig, LoggingConfig};
pub use coordinator::{Coordinator, CoordinatorSettings, Disposition};
pub use error::{BtError, Result};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::{MockBackend, MockCall, MockOutcome};
pub use peers::{NamingConvention, PeerAction, PeerRecord, PeerTable};
pub use shutdown::{install_signal_handlers, StopHandle};
pub use types::{
    is_valid_mac_address, normalize_address, AdapterInfo, AdapterProperty, BluezEvent,
    DeviceSnapshot,
};
