//! The seam between our logic and the system Bluetooth daemon.
//!
//! Everything the agent and the auto-pairing daemon need from BlueZ goes
//! through [`BluezBackend`]. The production implementation talks D-Bus via
//! bluer ([`crate::bluez::BluerBackend`]); tests use an in-memory stand-in.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent::AutoAcceptAgent;
use crate::error::Result;
use crate::types::{AdapterInfo, AdapterProperty, BluezEvent, DeviceSnapshot};

/// Operations the Bluetooth daemon exposes to us.
///
/// All addresses are upper-case `XX:XX:XX:XX:XX:XX` strings. Every call is an
/// independent request; nothing here retries.
#[allow(async_fn_in_trait)]
pub trait BluezBackend {
    /// Current state of the local adapter.
    async fn adapter_info(&self) -> Result<AdapterInfo>;

    /// Set one adapter property.
    async fn set_adapter_property(&self, property: AdapterProperty) -> Result<()>;

    /// Start device discovery. Fails with [`crate::BtError::InProgress`] if
    /// discovery is already running.
    async fn start_discovery(&self) -> Result<()>;

    /// Stop device discovery.
    async fn stop_discovery(&self) -> Result<()>;

    /// Every device BlueZ currently has an object for.
    async fn devices(&self) -> Result<Vec<DeviceSnapshot>>;

    /// Full property view of one device.
    async fn device(&self, address: &str) -> Result<DeviceSnapshot>;

    /// Bond with a device (`Device1.Pair`).
    async fn pair(&self, address: &str) -> Result<()>;

    /// Connect a device's profiles (`Device1.Connect`).
    async fn connect(&self, address: &str) -> Result<()>;

    /// Set `Device1.Trusted`.
    async fn set_trusted(&self, address: &str, trusted: bool) -> Result<()>;

    /// Register `agent` and request it as the default agent. Replaces any
    /// agent this backend registered before.
    async fn register_agent(&self, agent: Arc<AutoAcceptAgent>) -> Result<()>;

    /// Drop the agent registration, if any, and tell the agent it was released.
    async fn unregister_agent(&self) -> Result<()>;

    /// Subscribe to device notifications. The channel stays open for as long
    /// as the backend can deliver events.
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<BluezEvent>>;

    /// Find a device by address in the object cache.
    async fn find_device(&self, address: &str) -> Result<Option<DeviceSnapshot>> {
        Ok(self
            .devices()
            .await?
            .into_iter()
            .find(|device| device.address.eq_ignore_ascii_case(address)))
    }
}
