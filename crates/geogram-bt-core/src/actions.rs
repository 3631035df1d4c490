//! One-shot agent actions: serve, scan and pair.
//!
//! Unlike the daemon these are plain sequential flows. Waits are awaited
//! sleeps; nothing else runs while they are pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::adapter::{configure_for_serve, disable_discoverable};
use crate::agent::AutoAcceptAgent;
use crate::backend::BluezBackend;
use crate::error::{BtError, Result};
use crate::shutdown::StopHandle;
use crate::types::{normalize_address, DeviceSnapshot};

/// How long `--scan` keeps discovery on.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Discovery polling used when the device to pair is not cached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of polls after starting discovery.
    pub attempts: u32,
    /// Wait before each poll.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Successful result of [`pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// Pair succeeded just now.
    Paired,
    /// The device was bonded before we asked.
    AlreadyPaired,
}

/// Register `agent`, logging instead of failing if BlueZ refuses it.
pub async fn register_agent_quietly<B: BluezBackend>(
    backend: &B,
    agent: Arc<AutoAcceptAgent>,
) -> bool {
    match backend.register_agent(agent).await {
        Ok(()) => {
            info!("Agent registered and set as default");
            true
        }
        Err(err) => {
            warn!("Could not register agent: {}", err);
            warn!("Pairing may require manual confirmation");
            false
        }
    }
}

/// Make the adapter discoverable with an auto-accept agent until `stop` is
/// requested, then hide it again.
///
/// # Errors
///
/// Returns an error if the adapter cannot be read or configured.
pub async fn serve<B: BluezBackend>(backend: &B, stop: &StopHandle) -> Result<()> {
    let adapter = backend.adapter_info().await?;
    info!("Adapter: {}", adapter);

    let agent = Arc::new(AutoAcceptAgent::with_stop_handle(stop.clone(), false));
    let adapter = configure_for_serve(backend, agent).await?;
    info!(
        discoverable = adapter.discoverable,
        pairable = adapter.pairable,
        "Waiting for connections... (Ctrl+C to exit)"
    );
    info!(
        "To pair from another device: geogram-bt-agent --pair {}",
        adapter.address
    );

    stop.stopped().await;
    info!("Shutting down...");

    disable_discoverable(backend).await;
    if let Err(err) = backend.unregister_agent().await {
        debug!("Unregistering agent: {}", err);
    }
    Ok(())
}

/// Start discovery, tolerating one already running. Returns whether this
/// call started it.
async fn begin_discovery<B: BluezBackend>(backend: &B) -> Result<bool> {
    match backend.start_discovery().await {
        Ok(()) => Ok(true),
        Err(err) if err.is_benign() => {
            info!("Discovery already in progress");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

async fn end_discovery<B: BluezBackend>(backend: &B, started: bool) {
    if started {
        if let Err(err) = backend.stop_discovery().await {
            debug!("Stopping discovery: {}", err);
        }
    }
}

/// Discover for `duration` and return every device BlueZ knows about.
///
/// # Errors
///
/// Returns an error if discovery cannot be started or the device list
/// cannot be read.
pub async fn scan<B: BluezBackend>(backend: &B, duration: Duration) -> Result<Vec<DeviceSnapshot>> {
    info!("Scanning for {} seconds...", duration.as_secs());

    let started = begin_discovery(backend).await?;
    sleep(duration).await;
    end_discovery(backend, started).await;

    backend.devices().await
}

/// Pair with `address`, discovering it first if BlueZ has not seen it.
///
/// # Errors
///
/// Returns [`BtError::InvalidAddress`] for a malformed address,
/// [`BtError::DeviceNotFound`] if the device never shows up, and the BlueZ
/// error if pairing itself fails.
pub async fn pair<B: BluezBackend>(
    backend: &B,
    address: &str,
    retry: RetryPolicy,
) -> Result<PairOutcome> {
    let address = normalize_address(address)?;

    let mut device = backend.find_device(&address).await?;
    if device.is_none() {
        info!("Device {} not found in cache, scanning...", address);
        let started = begin_discovery(backend).await?;

        for attempt in 1..=retry.attempts {
            sleep(retry.interval).await;
            device = backend.find_device(&address).await?;
            if device.is_some() {
                break;
            }
            debug!(attempt, "Still looking for {}", address);
        }

        end_discovery(backend, started).await;
    }

    let Some(device) = device else {
        return Err(BtError::DeviceNotFound(address));
    };
    info!(
        trusted = device.trusted,
        rssi = ?device.rssi,
        "Found device at {}",
        device.object_path
    );

    if device.paired {
        info!("Device already paired");
        return Ok(PairOutcome::AlreadyPaired);
    }

    info!("Initiating pairing...");
    match backend.pair(&address).await {
        Ok(()) => info!("Pairing successful!"),
        Err(BtError::AlreadyPaired(_)) => {
            info!("Device already paired");
            return Ok(PairOutcome::AlreadyPaired);
        }
        Err(err) => return Err(err),
    }

    match backend.set_trusted(&address, true).await {
        Ok(()) => info!("Device trusted for auto-reconnect"),
        Err(err) => warn!("Could not trust {}: {}", address, err),
    }
    Ok(PairOutcome::Paired)
}

/// One scan result line: `  <address>  <name>  <paired>`.
#[must_use]
pub fn format_device_line(device: &DeviceSnapshot) -> String {
    let name = if device.name.is_empty() {
        "(unknown)"
    } else {
        device.name.as_str()
    };
    let paired = if device.paired { "paired" } else { "" };
    format!("  {}  {}  {}", device.address, name, paired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_device, MockBackend, MockCall, MockOutcome};

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    #[tokio::test(start_paused = true)]
    async fn test_pair_absent_device_polls_then_gives_up() {
        let mock = MockBackend::new();

        let err = pair(&mock, PEER, RetryPolicy::default()).await.unwrap_err();
        assert!(matches!(err, BtError::DeviceNotFound(_)));

        // One cache lookup, then ten polls while discovering.
        assert_eq!(mock.device_polls(), 11);
        assert_eq!(mock.pair_count(PEER), 0);
        assert!(!mock.is_discovering());
        assert!(mock.calls().contains(&MockCall::StopDiscovery));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_device_that_appears_during_discovery() {
        let mock = MockBackend::new();
        mock.add_hidden_device(mock_device(PEER, "Geogram-ABCD"), 3);

        let outcome = pair(&mock, "aa:bb:cc:dd:ee:ff", RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, PairOutcome::Paired);
        assert_eq!(mock.device_polls(), 4);

        let device = mock.device_state(PEER).unwrap();
        assert!(device.paired);
        assert!(device.trusted);
        assert!(!mock.is_discovering());
    }

    #[tokio::test]
    async fn test_pair_already_paired_device_skips_pair_call() {
        let mock = MockBackend::new();
        let mut device = mock_device(PEER, "Geogram-ABCD");
        device.paired = true;
        mock.add_device(device);

        let outcome = pair(&mock, PEER, RetryPolicy::default()).await.unwrap();
        assert_eq!(outcome, PairOutcome::AlreadyPaired);
        assert_eq!(mock.pair_count(PEER), 0);
        assert!(!mock.calls().contains(&MockCall::StartDiscovery));
    }

    #[tokio::test]
    async fn test_pair_failure_is_reported() {
        let mock = MockBackend::new();
        mock.add_device(mock_device(PEER, "Geogram-ABCD"));
        mock.script_pair(PEER, MockOutcome::Fail("Authentication Rejected".into()));

        let err = pair(&mock, PEER, RetryPolicy::default()).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(!mock.device_state(PEER).unwrap().trusted);
    }

    #[tokio::test]
    async fn test_pair_rejects_malformed_address() {
        let mock = MockBackend::new();
        let err = pair(&mock, "AA:BB", RetryPolicy::default()).await.unwrap_err();
        assert!(matches!(err, BtError::InvalidAddress(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_tolerates_discovery_in_progress() {
        let mock = MockBackend::new();
        mock.set_discovering(true);
        mock.add_device(mock_device(PEER, "Geogram-ABCD"));

        let devices = scan(&mock, DEFAULT_SCAN_DURATION).await.unwrap();
        assert_eq!(devices.len(), 1);
        // Discovery belongs to someone else; leave it running.
        assert!(mock.is_discovering());
        assert!(!mock.calls().contains(&MockCall::StopDiscovery));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_lists_devices_found() {
        let mock = MockBackend::new();
        mock.add_hidden_device(mock_device(PEER, "Geogram-ABCD"), 0);

        let devices = scan(&mock, DEFAULT_SCAN_DURATION).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(!mock.is_discovering());
    }

    #[tokio::test]
    async fn test_serve_until_stopped() {
        let mock = MockBackend::new();
        let stop = StopHandle::new();
        stop.request_stop();

        serve(&mock, &stop).await.unwrap();

        let adapter = mock.adapter();
        assert!(adapter.powered);
        assert!(adapter.pairable);
        assert!(!adapter.discoverable);
        assert!(!mock.has_agent());
        assert!(mock.calls().contains(&MockCall::RegisterAgent));
    }

    #[tokio::test]
    async fn test_serve_without_agent_still_serves() {
        let mock = MockBackend::new();
        mock.reject_agent();
        let stop = StopHandle::new();
        stop.request_stop();

        assert!(serve(&mock, &stop).await.is_ok());
        assert!(mock.adapter().powered);
    }

    #[test]
    fn test_format_device_line() {
        let mut device = mock_device(PEER, "Geogram-ABCD");
        assert_eq!(
            format_device_line(&device),
            "  AA:BB:CC:DD:EE:FF  Geogram-ABCD  "
        );

        device.paired = true;
        device.name = String::new();
        assert_eq!(
            format_device_line(&device),
            "  AA:BB:CC:DD:EE:FF  (unknown)  paired"
        );
    }
}
