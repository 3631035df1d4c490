//! Unified error types for the geogram-bt core library.
//!
//! [`BtError`] covers every failure mode of the agent and the auto-pairing
//! daemon. BlueZ reports some outcomes as errors that are not failures for
//! us ("already paired", "already connected", "operation in progress");
//! [`BtError::is_benign`] separates those from genuine failures.
//!
//! # Example
//!
//! ```rust
//! use geogram_bt_core::error::{BtError, Result};
//!
//! fn require_adapter(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(BtError::AdapterNotFound);
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_adapter(false).unwrap_err().is_adapter_error());
//! ```

use thiserror::Error;

/// The unified error type for all geogram-bt operations.
#[derive(Debug, Error)]
pub enum BtError {
    // =========================================================================
    // ADAPTER / SESSION ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and bluetoothd is running."
    )]
    AdapterNotFound,

    /// The D-Bus session to bluetoothd could not be opened.
    #[error("Failed to open BlueZ session: {0}")]
    SessionInitFailed(String),

    // =========================================================================
    // DEVICE ERRORS
    // =========================================================================
    /// The requested device is not in BlueZ's object cache.
    #[error("Device not found: '{0}'. Ensure the device is powered on, discoverable and within range.")]
    DeviceNotFound(String),

    /// A hardware address could not be parsed.
    #[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX.")]
    InvalidAddress(String),

    /// BlueZ refused to pair because a bond already exists.
    #[error("Device {0} is already paired")]
    AlreadyPaired(String),

    /// BlueZ refused to connect because the device is already connected.
    #[error("Device {0} is already connected")]
    AlreadyConnected(String),

    /// The same operation is already running inside BlueZ.
    #[error("Operation already in progress: {0}")]
    InProgress(String),

    // =========================================================================
    // AGENT ERRORS
    // =========================================================================
    /// The pairing agent could not be registered or made default.
    #[error("Could not register pairing agent: {0}")]
    AgentRegistrationFailed(String),

    // =========================================================================
    // GENERIC DAEMON CALL ERRORS
    // =========================================================================
    /// A BlueZ call failed for a reason we do not classify further.
    #[error("{operation} failed: {message}")]
    OperationFailed {
        /// The BlueZ call that failed (e.g. "Pair").
        operation: &'static str,
        /// Detail reported by BlueZ.
        message: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be loaded or parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for geogram-bt operations.
pub type Result<T> = std::result::Result<T, BtError>;

impl BtError {
    /// Build an [`BtError::OperationFailed`] for the given BlueZ call.
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation,
            message: message.into(),
        }
    }

    /// Returns `true` for outcomes that mean the desired state already holds
    /// or is being reached by someone else. These are logged, never counted
    /// as failures.
    #[inline]
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPaired(_) | Self::AlreadyConnected(_) | Self::InProgress(_)
        )
    }

    /// Returns `true` if this error is about the local adapter or session.
    #[inline]
    #[must_use]
    pub const fn is_adapter_error(&self) -> bool {
        matches!(self, Self::AdapterNotFound | Self::SessionInitFailed(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if the next scan or notification may succeed where this
    /// attempt did not.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_) | Self::OperationFailed { .. } | Self::InProgress(_)
        )
    }

    /// Process exit status for a fatal error, following `sysexits.h`.
    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            // EX_USAGE
            Self::InvalidAddress(_) => 64,
            // EX_UNAVAILABLE
            Self::AdapterNotFound | Self::SessionInitFailed(_) => 69,
            // EX_IOERR
            Self::IoError(_) => 74,
            // EX_CONFIG
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 78,
            _ => 1,
        }
    }

    /// Returns a machine-readable error code, used as a structured log field.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::SessionInitFailed(_) => "SESSION_INIT_FAILED",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::AlreadyPaired(_) => "ALREADY_PAIRED",
            Self::AlreadyConnected(_) => "ALREADY_CONNECTED",
            Self::InProgress(_) => "IN_PROGRESS",
            Self::AgentRegistrationFailed(_) => "AGENT_REGISTRATION_FAILED",
            Self::OperationFailed { .. } => "OPERATION_FAILED",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BtError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::NoConfigDir => {
                Self::ConfigParseError("Cannot determine config directory".into())
            }
            err @ ConfigError::Validation { .. } => Self::ConfigValidationError(err.to_string()),
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for BtError {
    fn from(err: bluer::Error) -> Self {
        use bluer::ErrorKind;
        match &err.kind {
            ErrorKind::AlreadyExists => Self::AlreadyPaired(err.message),
            ErrorKind::AlreadyConnected => Self::AlreadyConnected(err.message),
            ErrorKind::InProgress => Self::InProgress(err.message),
            ErrorKind::DoesNotExist => Self::DeviceNotFound(err.message),
            ErrorKind::InvalidAddress(address) => Self::InvalidAddress(address.clone()),
            _ => Self::operation("BlueZ call", err.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_benign_classification() {
        assert!(BtError::AlreadyPaired("AA:BB:CC:DD:EE:FF".into()).is_benign());
        assert!(BtError::AlreadyConnected("AA:BB:CC:DD:EE:FF".into()).is_benign());
        assert!(BtError::InProgress("Discovery".into()).is_benign());

        assert!(!BtError::operation("Pair", "Authentication Failed").is_benign());
        assert!(!BtError::AdapterNotFound.is_benign());
        assert!(!BtError::DeviceNotFound("AA:BB:CC:DD:EE:FF".into()).is_benign());
    }

    #[test]
    fn test_adapter_error_classification() {
        assert!(BtError::AdapterNotFound.is_adapter_error());
        assert!(BtError::SessionInitFailed("no bus".into()).is_adapter_error());
        assert!(!BtError::InProgress("x".into()).is_adapter_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(BtError::ConfigParseError("syntax".into()).is_config_error());
        assert!(BtError::ConfigValidationError("callsign".into()).is_config_error());
        assert!(!BtError::AdapterNotFound.is_config_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BtError::DeviceNotFound("AA:BB:CC:DD:EE:FF".into()).is_recoverable());
        assert!(BtError::operation("Connect", "Page Timeout").is_recoverable());
        assert!(!BtError::AdapterNotFound.is_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BtError::AdapterNotFound.exit_code(), 69);
        assert_eq!(BtError::ConfigValidationError("x".into()).exit_code(), 78);
        assert_eq!(BtError::InvalidAddress("nope".into()).exit_code(), 64);
        assert_eq!(BtError::DeviceNotFound("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BtError::AdapterNotFound.error_code(), "ADAPTER_NOT_FOUND");
        assert_eq!(
            BtError::AlreadyPaired("x".into()).error_code(),
            "ALREADY_PAIRED"
        );
        assert_eq!(
            BtError::operation("Pair", "x").error_code(),
            "OPERATION_FAILED"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: BtError = io_err.into();
        assert!(matches!(err, BtError::IoError(_)));
    }

    #[test]
    fn test_operation_failed_display() {
        let err = BtError::operation("Pair", "org.bluez.Error.AuthenticationFailed");
        assert_eq!(
            err.to_string(),
            "Pair failed: org.bluez.Error.AuthenticationFailed"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BtError>();
        assert_sync::<BtError>();
    }
}
