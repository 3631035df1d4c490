//! Shared types describing what BlueZ reports about the adapter and devices.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BtError, Result};

/// Matches `AA:BB:CC:DD:EE:FF` in either case.
static MAC_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC address regex is valid")
});

/// Returns `true` if `address` is a colon-separated 48-bit hardware address.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_REGEX.is_match(address)
}

/// Validate and upper-case a hardware address.
///
/// # Errors
///
/// Returns [`BtError::InvalidAddress`] if the address is malformed.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if is_valid_mac_address(trimmed) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(BtError::InvalidAddress(address.to_string()))
    }
}

/// BlueZ object path of a device, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
#[must_use]
pub fn device_object_path(adapter: &str, address: &str) -> String {
    format!("/org/bluez/{adapter}/dev_{}", address.replace(':', "_"))
}

/// State of the local adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Interface name, e.g. `hci0`.
    pub name: String,
    /// Hardware address of the local radio.
    pub address: String,
    /// Advertised (friendly) name.
    pub alias: String,
    /// Whether the radio is powered.
    pub powered: bool,
    /// Whether other devices can discover us.
    pub discoverable: bool,
    /// Whether incoming pairing is accepted.
    pub pairable: bool,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.address)
    }
}

/// A single settable adapter property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterProperty {
    /// Radio power.
    Powered(bool),
    /// Advertised name.
    Alias(String),
    /// Visible to inquiry scans.
    Discoverable(bool),
    /// Accepts incoming pairing.
    Pairable(bool),
    /// Seconds until discoverable switches off; `0` never expires.
    DiscoverableTimeout(u32),
    /// Seconds until pairable switches off; `0` never expires.
    PairableTimeout(u32),
}

impl AdapterProperty {
    /// BlueZ property name on `org.bluez.Adapter1`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Powered(_) => "Powered",
            Self::Alias(_) => "Alias",
            Self::Discoverable(_) => "Discoverable",
            Self::Pairable(_) => "Pairable",
            Self::DiscoverableTimeout(_) => "DiscoverableTimeout",
            Self::PairableTimeout(_) => "PairableTimeout",
        }
    }
}

impl fmt::Display for AdapterProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Powered(v) | Self::Discoverable(v) | Self::Pairable(v) => {
                write!(f, "{}={v}", self.name())
            }
            Self::Alias(v) => write!(f, "{}={v}", self.name()),
            Self::DiscoverableTimeout(v) | Self::PairableTimeout(v) => {
                write!(f, "{}={v}", self.name())
            }
        }
    }
}

/// Property view of one remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Upper-case hardware address.
    pub address: String,
    /// Remote name; empty when the device has not broadcast one.
    pub name: String,
    /// Bonded with the local adapter.
    pub paired: bool,
    /// Has an active baseband connection.
    pub connected: bool,
    /// Marked trusted for automatic reconnection.
    pub trusted: bool,
    /// Last inquiry RSSI in dBm.
    pub rssi: Option<i16>,
    /// BlueZ object path.
    pub object_path: String,
}

/// Notification from BlueZ about a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluezEvent {
    /// A device object appeared (InterfacesAdded).
    DeviceAdded(String),
    /// A property of a known device changed (PropertiesChanged).
    DeviceChanged(String),
}

impl BluezEvent {
    /// Address of the device the event is about.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::DeviceAdded(address) | Self::DeviceChanged(address) => address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_mac_address() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("GG:BB:CC:DD:EE:FF"));
        assert!(!is_valid_mac_address(""));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address(" aa:bb:cc:dd:ee:0f ").unwrap(),
            "AA:BB:CC:DD:EE:0F"
        );
        assert!(matches!(
            normalize_address("not-an-address"),
            Err(BtError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_device_object_path() {
        assert_eq!(
            device_object_path("hci0", "AA:BB:CC:DD:EE:FF"),
            "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF"
        );
    }

    #[test]
    fn test_adapter_info_display_uses_alias() {
        let adapter = AdapterInfo {
            name: "hci0".to_string(),
            address: "00:11:22:33:44:55".to_string(),
            alias: "raspberrypi".to_string(),
            powered: true,
            discoverable: false,
            pairable: false,
        };
        assert_eq!(adapter.to_string(), "raspberrypi (00:11:22:33:44:55)");
    }

    #[test]
    fn test_adapter_property_display() {
        assert_eq!(AdapterProperty::Powered(true).to_string(), "Powered=true");
        assert_eq!(
            AdapterProperty::Alias("Geogram-X34PSK".into()).to_string(),
            "Alias=Geogram-X34PSK"
        );
        assert_eq!(
            AdapterProperty::DiscoverableTimeout(0).to_string(),
            "DiscoverableTimeout=0"
        );
    }
}
