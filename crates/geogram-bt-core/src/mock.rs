//! In-memory [`BluezBackend`] for tests and for running without hardware.
//!
//! Behaves like bluetoothd where it matters to us: Pair on a bonded device
//! reports "already exists", Connect on a connected device reports "already
//! connected", starting discovery twice reports "in progress". Results can be
//! scripted per device and every call is recorded.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::agent::AutoAcceptAgent;
use crate::backend::BluezBackend;
use crate::error::{BtError, Result};
use crate::types::{device_object_path, AdapterInfo, AdapterProperty, BluezEvent, DeviceSnapshot};

/// Scripted answer for the next Pair or Connect on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// The call succeeds and updates the device.
    Succeed,
    /// BlueZ reports the device is already paired.
    AlreadyPaired,
    /// BlueZ reports the device is already connected.
    AlreadyConnected,
    /// BlueZ reports the operation is in progress.
    InProgress,
    /// The call fails with the given BlueZ message.
    Fail(String),
}

impl MockOutcome {
    fn into_result(self, operation: &'static str, address: &str) -> Result<()> {
        match self {
            Self::Succeed => Ok(()),
            Self::AlreadyPaired => Err(BtError::AlreadyPaired(address.to_string())),
            Self::AlreadyConnected => Err(BtError::AlreadyConnected(address.to_string())),
            Self::InProgress => Err(BtError::InProgress(operation.to_string())),
            Self::Fail(message) => Err(BtError::operation(operation, message)),
        }
    }
}

/// A call made against the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `set_adapter_property`.
    SetAdapterProperty(AdapterProperty),
    /// `start_discovery`.
    StartDiscovery,
    /// `stop_discovery`.
    StopDiscovery,
    /// `pair`.
    Pair(String),
    /// `connect`.
    Connect(String),
    /// `set_trusted`.
    SetTrusted(String, bool),
    /// `register_agent`.
    RegisterAgent,
    /// `unregister_agent`.
    UnregisterAgent,
}

#[derive(Debug)]
struct HiddenDevice {
    snapshot: DeviceSnapshot,
    polls_until_visible: u32,
}

#[derive(Debug)]
struct MockState {
    adapter: AdapterInfo,
    devices: BTreeMap<String, DeviceSnapshot>,
    hidden: Vec<HiddenDevice>,
    unreadable: Vec<String>,
    discovering: bool,
    pair_script: HashMap<String, VecDeque<MockOutcome>>,
    connect_script: HashMap<String, VecDeque<MockOutcome>>,
    calls: Vec<MockCall>,
    device_polls: usize,
    agent: Option<Arc<AutoAcceptAgent>>,
    reject_agent: bool,
}

/// In-memory BlueZ.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
    events_tx: mpsc::UnboundedSender<BluezEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<BluezEvent>>>,
}

/// Build a device snapshot the way BlueZ would report a fresh inquiry result.
#[must_use]
pub fn mock_device(address: &str, name: &str) -> DeviceSnapshot {
    DeviceSnapshot {
        address: address.to_ascii_uppercase(),
        name: name.to_string(),
        paired: false,
        connected: false,
        trusted: false,
        rssi: Some(-60),
        object_path: device_object_path("hci0", &address.to_ascii_uppercase()),
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A powered-off adapter `hci0` at `00:11:22:33:44:55` with no devices.
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MockState {
                adapter: AdapterInfo {
                    name: "hci0".to_string(),
                    address: "00:11:22:33:44:55".to_string(),
                    alias: "raspberrypi".to_string(),
                    powered: false,
                    discoverable: false,
                    pairable: false,
                },
                devices: BTreeMap::new(),
                hidden: Vec::new(),
                unreadable: Vec::new(),
                discovering: false,
                pair_script: HashMap::new(),
                connect_script: HashMap::new(),
                calls: Vec::new(),
                device_polls: 0,
                agent: None,
                reject_agent: false,
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `device` visible in the object cache.
    pub fn add_device(&self, device: DeviceSnapshot) {
        self.state().devices.insert(device.address.clone(), device);
    }

    /// Make `device` appear only after discovery has been running for
    /// `polls` device listings. With `0` it appears as soon as discovery
    /// starts. Appearing emits [`BluezEvent::DeviceAdded`].
    pub fn add_hidden_device(&self, device: DeviceSnapshot, polls: u32) {
        self.state().hidden.push(HiddenDevice {
            snapshot: device,
            polls_until_visible: polls,
        });
    }

    /// Make property reads for `address` fail.
    pub fn make_unreadable(&self, address: &str) {
        self.state().unreadable.push(address.to_ascii_uppercase());
    }

    /// Change a visible device behind the caller's back.
    pub fn update_device(&self, address: &str, update: impl FnOnce(&mut DeviceSnapshot)) {
        if let Some(device) = self.state().devices.get_mut(&address.to_ascii_uppercase()) {
            update(device);
        }
    }

    /// Queue the result of the next Pair on `address`.
    pub fn script_pair(&self, address: &str, outcome: MockOutcome) {
        self.state()
            .pair_script
            .entry(address.to_ascii_uppercase())
            .or_default()
            .push_back(outcome);
    }

    /// Queue the result of the next Connect on `address`.
    pub fn script_connect(&self, address: &str, outcome: MockOutcome) {
        self.state()
            .connect_script
            .entry(address.to_ascii_uppercase())
            .or_default()
            .push_back(outcome);
    }

    /// Make agent registration fail.
    pub fn reject_agent(&self) {
        self.state().reject_agent = true;
    }

    /// Pretend discovery was started by another client.
    pub fn set_discovering(&self, discovering: bool) {
        self.state().discovering = discovering;
    }

    /// Deliver a notification to the subscriber.
    pub fn emit(&self, event: BluezEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Number of Pair calls made for `address`.
    #[must_use]
    pub fn pair_count(&self, address: &str) -> usize {
        let address = address.to_ascii_uppercase();
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Pair(a) if *a == address))
            .count()
    }

    /// Number of Connect calls made for `address`.
    #[must_use]
    pub fn connect_count(&self, address: &str) -> usize {
        let address = address.to_ascii_uppercase();
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Connect(a) if *a == address))
            .count()
    }

    /// Number of times the object cache was listed.
    #[must_use]
    pub fn device_polls(&self) -> usize {
        self.state().device_polls
    }

    /// Current adapter state.
    #[must_use]
    pub fn adapter(&self) -> AdapterInfo {
        self.state().adapter.clone()
    }

    /// Whether discovery is running.
    #[must_use]
    pub fn is_discovering(&self) -> bool {
        self.state().discovering
    }

    /// Current state of a visible device.
    #[must_use]
    pub fn device_state(&self, address: &str) -> Option<DeviceSnapshot> {
        self.state()
            .devices
            .get(&address.to_ascii_uppercase())
            .cloned()
    }

    /// Whether an agent is registered.
    #[must_use]
    pub fn has_agent(&self) -> bool {
        self.state().agent.is_some()
    }

    fn reveal(&self, state: &mut MockState) {
        let (ready, waiting): (Vec<_>, Vec<_>) = state
            .hidden
            .drain(..)
            .partition(|hidden| hidden.polls_until_visible == 0);
        state.hidden = waiting;
        for hidden in ready {
            let address = hidden.snapshot.address.clone();
            state.devices.insert(address.clone(), hidden.snapshot);
            let _ = self.events_tx.send(BluezEvent::DeviceAdded(address));
        }
    }
}

impl BluezBackend for MockBackend {
    async fn adapter_info(&self) -> Result<AdapterInfo> {
        Ok(self.state().adapter.clone())
    }

    async fn set_adapter_property(&self, property: AdapterProperty) -> Result<()> {
        let mut state = self.state();
        state.calls.push(MockCall::SetAdapterProperty(property.clone()));
        match property {
            AdapterProperty::Powered(v) => state.adapter.powered = v,
            AdapterProperty::Alias(v) => state.adapter.alias = v,
            AdapterProperty::Discoverable(v) => state.adapter.discoverable = v,
            AdapterProperty::Pairable(v) => state.adapter.pairable = v,
            AdapterProperty::DiscoverableTimeout(_) | AdapterProperty::PairableTimeout(_) => {}
        }
        Ok(())
    }

    async fn start_discovery(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(MockCall::StartDiscovery);
        if state.discovering {
            return Err(BtError::InProgress("Discovery".to_string()));
        }
        state.discovering = true;
        self.reveal(&mut state);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(MockCall::StopDiscovery);
        if !state.discovering {
            return Err(BtError::operation("StopDiscovery", "No discovery started"));
        }
        state.discovering = false;
        Ok(())
    }

    async fn devices(&self) -> Result<Vec<DeviceSnapshot>> {
        let mut state = self.state();
        state.device_polls += 1;
        if state.discovering {
            for hidden in &mut state.hidden {
                hidden.polls_until_visible = hidden.polls_until_visible.saturating_sub(1);
            }
            self.reveal(&mut state);
        }
        Ok(state.devices.values().cloned().collect())
    }

    async fn device(&self, address: &str) -> Result<DeviceSnapshot> {
        let state = self.state();
        let address = address.to_ascii_uppercase();
        if state.unreadable.contains(&address) {
            return Err(BtError::operation("GetAll", "org.freedesktop.DBus.Error.UnknownObject"));
        }
        state
            .devices
            .get(&address)
            .cloned()
            .ok_or(BtError::DeviceNotFound(address))
    }

    async fn pair(&self, address: &str) -> Result<()> {
        let mut state = self.state();
        let address = address.to_ascii_uppercase();
        state.calls.push(MockCall::Pair(address.clone()));

        let already_paired = match state.devices.get(&address) {
            Some(device) => device.paired,
            None => return Err(BtError::DeviceNotFound(address)),
        };
        let outcome = state
            .pair_script
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(if already_paired {
                MockOutcome::AlreadyPaired
            } else {
                MockOutcome::Succeed
            });

        if outcome == MockOutcome::Succeed {
            if let Some(device) = state.devices.get_mut(&address) {
                device.paired = true;
            }
        }
        outcome.into_result("Pair", &address)
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let mut state = self.state();
        let address = address.to_ascii_uppercase();
        state.calls.push(MockCall::Connect(address.clone()));

        let already_connected = match state.devices.get(&address) {
            Some(device) => device.connected,
            None => return Err(BtError::DeviceNotFound(address)),
        };
        let outcome = state
            .connect_script
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(if already_connected {
                MockOutcome::AlreadyConnected
            } else {
                MockOutcome::Succeed
            });

        if outcome == MockOutcome::Succeed {
            if let Some(device) = state.devices.get_mut(&address) {
                device.connected = true;
            }
        }
        outcome.into_result("Connect", &address)
    }

    async fn set_trusted(&self, address: &str, trusted: bool) -> Result<()> {
        let mut state = self.state();
        let address = address.to_ascii_uppercase();
        state.calls.push(MockCall::SetTrusted(address.clone(), trusted));
        match state.devices.get_mut(&address) {
            Some(device) => {
                device.trusted = trusted;
                Ok(())
            }
            None => Err(BtError::DeviceNotFound(address)),
        }
    }

    async fn register_agent(&self, agent: Arc<AutoAcceptAgent>) -> Result<()> {
        let mut state = self.state();
        state.calls.push(MockCall::RegisterAgent);
        if state.reject_agent {
            return Err(BtError::AgentRegistrationFailed(
                "org.bluez.Error.AlreadyExists".to_string(),
            ));
        }
        state.agent = Some(agent);
        Ok(())
    }

    async fn unregister_agent(&self) -> Result<()> {
        let agent = {
            let mut state = self.state();
            state.calls.push(MockCall::UnregisterAgent);
            state.agent.take()
        };
        if let Some(agent) = agent {
            agent.release();
        }
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<BluezEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| BtError::operation("AddMatch", "already subscribed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    #[tokio::test]
    async fn test_pair_then_pair_again_reports_already_paired() {
        let mock = MockBackend::new();
        mock.add_device(mock_device(PEER, "Geogram-ABCD"));

        assert!(mock.pair(PEER).await.is_ok());
        assert!(mock.device_state(PEER).unwrap().paired);

        let err = mock.pair(PEER).await.unwrap_err();
        assert!(matches!(err, BtError::AlreadyPaired(_)));
    }

    #[tokio::test]
    async fn test_scripted_failure_leaves_device_unchanged() {
        let mock = MockBackend::new();
        mock.add_device(mock_device(PEER, "Geogram-ABCD"));
        mock.script_connect(PEER, MockOutcome::Fail("Page Timeout".into()));

        let err = mock.connect(PEER).await.unwrap_err();
        assert!(!err.is_benign());
        assert!(!mock.device_state(PEER).unwrap().connected);
    }

    #[tokio::test]
    async fn test_hidden_device_appears_during_discovery() {
        let mock = MockBackend::new();
        mock.add_hidden_device(mock_device(PEER, "Geogram-ABCD"), 2);

        assert!(mock.devices().await.unwrap().is_empty());
        mock.start_discovery().await.unwrap();
        assert!(mock.devices().await.unwrap().is_empty());
        assert_eq!(mock.devices().await.unwrap().len(), 1);

        let mut events = mock.events().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(BluezEvent::DeviceAdded(PEER.to_string()))
        );
    }

    #[tokio::test]
    async fn test_second_discovery_start_is_in_progress() {
        let mock = MockBackend::new();
        mock.start_discovery().await.unwrap();
        let err = mock.start_discovery().await.unwrap_err();
        assert!(matches!(err, BtError::InProgress(_)));
    }
}
