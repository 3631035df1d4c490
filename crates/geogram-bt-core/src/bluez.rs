//! [`BluezBackend`] on top of bluer's D-Bus client.
//!
//! bluer models discovery as a stream that keeps discovery running while it
//! is alive, so start/stop map to spawning and cancelling a task that owns
//! that stream. Device notifications from the adapter and from every known
//! device are merged by a forwarding task into one channel.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluer::agent::AgentHandle;
use bluer::{Adapter, AdapterEvent, Address, Device, Session};
use futures::stream::SelectAll;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::agent::{into_bluer_agent, AutoAcceptAgent};
use crate::backend::BluezBackend;
use crate::error::{BtError, Result};
use crate::types::{device_object_path, AdapterInfo, AdapterProperty, BluezEvent, DeviceSnapshot};

type ChangeStream = Pin<Box<dyn Stream<Item = Address> + Send>>;

struct AgentRegistration {
    _handle: AgentHandle,
    agent: Arc<AutoAcceptAgent>,
}

/// BlueZ backend for the default adapter of the system bus.
pub struct BluerBackend {
    session: Session,
    adapter: Adapter,
    agent: Mutex<Option<AgentRegistration>>,
    discovery: Mutex<Option<oneshot::Sender<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A session whose task has exited leaves a closed sender behind.
fn discovery_running(slot: Option<&oneshot::Sender<()>>) -> bool {
    slot.is_some_and(|cancel| !cancel.is_closed())
}

impl BluerBackend {
    /// Open a session to bluetoothd and pick the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`BtError::SessionInitFailed`] if the system bus or
    /// bluetoothd is unreachable, and [`BtError::AdapterNotFound`] if no
    /// adapter exists.
    pub async fn connect() -> Result<Self> {
        let session = Session::new()
            .await
            .map_err(|e| BtError::SessionInitFailed(e.to_string()))?;

        let adapter = session.default_adapter().await.map_err(|e| {
            debug!(error = %e, "default_adapter failed");
            BtError::AdapterNotFound
        })?;

        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        Ok(Self {
            session,
            adapter,
            agent: Mutex::new(None),
            discovery: Mutex::new(None),
        })
    }

    fn device_handle(&self, address: &str) -> Result<Device> {
        let address: Address = address
            .parse()
            .map_err(|_| BtError::InvalidAddress(address.to_string()))?;
        Ok(self.adapter.device(address)?)
    }

    async fn snapshot(&self, device: &Device) -> Result<DeviceSnapshot> {
        let address = device.address().to_string();
        Ok(DeviceSnapshot {
            name: device.name().await?.unwrap_or_default(),
            paired: device.is_paired().await?,
            connected: device.is_connected().await?,
            trusted: device.is_trusted().await?,
            rssi: device.rssi().await?,
            object_path: device_object_path(self.adapter.name(), &address),
            address,
        })
    }
}

impl BluezBackend for BluerBackend {
    async fn adapter_info(&self) -> Result<AdapterInfo> {
        Ok(AdapterInfo {
            name: self.adapter.name().to_string(),
            address: self.adapter.address().await?.to_string(),
            alias: self.adapter.alias().await?,
            powered: self.adapter.is_powered().await?,
            discoverable: self.adapter.is_discoverable().await?,
            pairable: self.adapter.is_pairable().await?,
        })
    }

    async fn set_adapter_property(&self, property: AdapterProperty) -> Result<()> {
        debug!(%property, "Setting adapter property");
        match property {
            AdapterProperty::Powered(v) => self.adapter.set_powered(v).await?,
            AdapterProperty::Alias(v) => self.adapter.set_alias(v).await?,
            AdapterProperty::Discoverable(v) => self.adapter.set_discoverable(v).await?,
            AdapterProperty::Pairable(v) => self.adapter.set_pairable(v).await?,
            AdapterProperty::DiscoverableTimeout(v) => {
                self.adapter.set_discoverable_timeout(v).await?;
            }
            AdapterProperty::PairableTimeout(v) => self.adapter.set_pairable_timeout(v).await?,
        }
        Ok(())
    }

    async fn start_discovery(&self) -> Result<()> {
        if discovery_running(lock(&self.discovery).as_ref()) {
            return Err(BtError::InProgress("Discovery".to_string()));
        }

        let discovery = self.adapter.discover_devices().await?;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            futures::pin_mut!(discovery);
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    event = discovery.next() => {
                        if event.is_none() {
                            break;
                        }
                    }
                }
            }
            debug!("Discovery session closed");
        });

        *lock(&self.discovery) = Some(cancel_tx);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        let cancel = lock(&self.discovery).take();
        match cancel {
            Some(cancel) if !cancel.is_closed() => {
                let _ = cancel.send(());
                Ok(())
            }
            _ => Err(BtError::operation("StopDiscovery", "No discovery started")),
        }
    }

    async fn devices(&self) -> Result<Vec<DeviceSnapshot>> {
        let mut devices = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            match self.snapshot(&device).await {
                Ok(snapshot) => devices.push(snapshot),
                Err(err) => debug!(%address, %err, "Skipping unreadable device"),
            }
        }
        Ok(devices)
    }

    async fn device(&self, address: &str) -> Result<DeviceSnapshot> {
        let device = self.device_handle(address)?;
        if !self
            .adapter
            .device_addresses()
            .await?
            .contains(&device.address())
        {
            return Err(BtError::DeviceNotFound(address.to_string()));
        }
        self.snapshot(&device).await
    }

    async fn pair(&self, address: &str) -> Result<()> {
        Ok(self.device_handle(address)?.pair().await?)
    }

    async fn connect(&self, address: &str) -> Result<()> {
        Ok(self.device_handle(address)?.connect().await?)
    }

    async fn set_trusted(&self, address: &str, trusted: bool) -> Result<()> {
        Ok(self.device_handle(address)?.set_trusted(trusted).await?)
    }

    async fn register_agent(&self, agent: Arc<AutoAcceptAgent>) -> Result<()> {
        self.unregister_agent().await?;

        let handle = self
            .session
            .register_agent(into_bluer_agent(agent.clone()))
            .await
            .map_err(|e| BtError::AgentRegistrationFailed(e.to_string()))?;

        *lock(&self.agent) = Some(AgentRegistration {
            _handle: handle,
            agent,
        });
        Ok(())
    }

    async fn unregister_agent(&self) -> Result<()> {
        let registration = lock(&self.agent).take();
        if let Some(registration) = registration {
            let agent = registration.agent.clone();
            drop(registration);
            agent.release();
        }
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<BluezEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter_events = self.adapter.events().await?;

        let mut changes = SelectAll::new();
        for address in self.adapter.device_addresses().await? {
            match device_changes(&self.adapter, address).await {
                Ok(stream) => changes.push(stream),
                Err(err) => debug!(%address, %err, "Not watching device"),
            }
        }

        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            futures::pin_mut!(adapter_events);
            loop {
                let event = tokio::select! {
                    Some(event) = adapter_events.next() => match event {
                        AdapterEvent::DeviceAdded(address) => {
                            match device_changes(&adapter, address).await {
                                Ok(stream) => changes.push(stream),
                                Err(err) => debug!(%address, %err, "Not watching device"),
                            }
                            BluezEvent::DeviceAdded(address.to_string())
                        }
                        _ => continue,
                    },
                    Some(address) = changes.next() => BluezEvent::DeviceChanged(address.to_string()),
                    else => break,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!("BlueZ notification forwarding stopped");
        });

        Ok(rx)
    }
}

async fn device_changes(adapter: &Adapter, address: Address) -> Result<ChangeStream> {
    let events = adapter.device(address)?.events().await?;
    Ok(events.map(move |_| address).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_running_tracks_session_task() {
        assert!(!discovery_running(None));

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        assert!(discovery_running(Some(&cancel_tx)));

        // Stream ended and the task dropped its receiver.
        drop(cancel_rx);
        assert!(!discovery_running(Some(&cancel_tx)));
    }
}
