//! Discovery and auto-pairing loop.
//!
//! The coordinator watches BlueZ for devices following the Geogram naming
//! convention and moves each one from discovered to paired to connected.
//! Pair and connect are fire-and-forget: a failure is logged and recorded,
//! and the next scan or notification tries again.
//!
//! Everything runs on one task. Notifications, the scan timer, the
//! scan-stop deadline, the status timer and the optional test-mode deadline
//! are multiplexed in a single `select!`, so peer state is never shared.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapter::{configure_for_daemon, disable_discoverable};
use crate::agent::AutoAcceptAgent;
use crate::backend::BluezBackend;
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::peers::{NamingConvention, PeerAction, PeerTable};
use crate::shutdown::StopHandle;
use crate::types::{AdapterInfo, BluezEvent, DeviceSnapshot};

/// Timer settings for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Time between scan starts.
    pub scan_interval: Duration,
    /// How long discovery stays on per scan.
    pub scan_duration: Duration,
    /// Time between status reports.
    pub status_interval: Duration,
    /// Stop on our own after this long (test mode).
    pub test_duration: Option<Duration>,
}

impl CoordinatorSettings {
    /// Settings from a loaded configuration.
    #[must_use]
    pub const fn from_config(config: &DaemonConfig, test_mode: bool) -> Self {
        Self {
            scan_interval: config.scan_interval(),
            scan_duration: config.scan_duration(),
            status_interval: config.status_interval(),
            test_duration: if test_mode {
                Some(config.test_duration())
            } else {
                None
            },
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default(), false)
    }
}

/// How [`Coordinator::handle_device`] classified a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Name does not follow the convention.
    NotAPeer,
    /// The local adapter itself.
    OwnDevice,
    /// A Geogram peer; `is_new` on first sight.
    Peer {
        /// First time this address was seen.
        is_new: bool,
    },
}

/// Auto-pairing coordinator over a [`BluezBackend`].
pub struct Coordinator<B: BluezBackend> {
    backend: B,
    naming: NamingConvention,
    settings: CoordinatorSettings,
    peers: PeerTable,
    local_address: Option<String>,
    agent: Arc<AutoAcceptAgent>,
    stop: StopHandle,
    discovery_deadline: Option<Instant>,
}

impl<B: BluezBackend> Coordinator<B> {
    /// Create a coordinator; nothing touches BlueZ until [`Coordinator::run`].
    pub fn new(
        backend: B,
        naming: NamingConvention,
        settings: CoordinatorSettings,
        stop: StopHandle,
    ) -> Self {
        let agent = Arc::new(AutoAcceptAgent::with_stop_handle(stop.clone(), false));
        Self {
            backend,
            naming,
            settings,
            peers: PeerTable::new(),
            local_address: None,
            agent,
            stop,
            discovery_deadline: None,
        }
    }

    /// The backend in use.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Peers seen so far.
    pub const fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Whether a scan is waiting for its stop deadline.
    pub const fn is_scanning(&self) -> bool {
        self.discovery_deadline.is_some()
    }

    /// Apply the daemon adapter settings and remember the local address.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot be configured.
    pub async fn setup_adapter(&mut self) -> Result<AdapterInfo> {
        let adapter = configure_for_daemon(&self.backend, self.naming.local_name()).await?;
        self.local_address = Some(adapter.address.clone());
        Ok(adapter)
    }

    /// Register the auto-accept agent. Returns `false` (after logging) if
    /// BlueZ refuses it.
    pub async fn register_agent(&self) -> bool {
        match self.backend.register_agent(Arc::clone(&self.agent)).await {
            Ok(()) => {
                info!("Pairing agent registered");
                true
            }
            Err(err) => {
                warn!("Failed to register agent: {}", err);
                false
            }
        }
    }

    /// React to a BlueZ notification. Errors fetching the device are
    /// swallowed; the next notification or scan will see it again.
    pub async fn handle_event(&mut self, event: BluezEvent) {
        let address = event.address();
        match self.backend.device(address).await {
            Ok(snapshot) => {
                self.handle_device(&snapshot).await;
            }
            Err(err) => debug!("Ignoring {:?}: {}", event, err),
        }
    }

    /// Decide what to do with a device and do it.
    pub async fn handle_device(&mut self, snapshot: &DeviceSnapshot) -> Disposition {
        let Some(callsign) = self.naming.callsign_of(&snapshot.name) else {
            return Disposition::NotAPeer;
        };
        let is_self = self.naming.is_local(&snapshot.name)
            || self
                .local_address
                .as_deref()
                .is_some_and(|local| local.eq_ignore_ascii_case(&snapshot.address));
        if is_self {
            return Disposition::OwnDevice;
        }

        let is_new = self.peers.observe(snapshot, callsign);
        if is_new {
            info!(
                rssi = ?snapshot.rssi,
                trusted = snapshot.trusted,
                "DISCOVERED: {} ({})",
                snapshot.name,
                snapshot.address
            );
        }

        let action = self
            .peers
            .get(&snapshot.address)
            .map_or(PeerAction::Nothing, |record| record.next_action());
        match action {
            PeerAction::Pair => self.auto_pair(&snapshot.address).await,
            PeerAction::Connect => self.auto_connect(&snapshot.address).await,
            PeerAction::Nothing => {}
        }

        Disposition::Peer { is_new }
    }

    /// Pair, trust, then connect.
    pub async fn auto_pair(&mut self, address: &str) {
        info!("AUTO-PAIR: Initiating pairing with {}", address);

        match self.backend.pair(address).await {
            Ok(()) => {
                info!("AUTO-PAIR: Pairing successful with {}", address);
                self.peers.mark_paired(address);

                match self.backend.set_trusted(address, true).await {
                    Ok(()) => info!("AUTO-PAIR: Device {} trusted", address),
                    Err(err) => warn!("AUTO-PAIR: Could not trust {}: {}", address, err),
                }

                self.auto_connect(address).await;
            }
            Err(err) if err.is_benign() => {
                info!("AUTO-PAIR: Already paired with {} ({})", address, err);
            }
            Err(err) => {
                warn!(
                    code = err.error_code(),
                    retry = err.is_recoverable(),
                    "AUTO-PAIR: Failed with {}: {}",
                    address,
                    err
                );
                self.peers.record_failure(address, err.to_string());
            }
        }
    }

    /// Connect a bonded peer.
    pub async fn auto_connect(&mut self, address: &str) {
        info!("AUTO-CONNECT: Connecting to {}", address);

        match self.backend.connect(address).await {
            Ok(()) => {
                info!("AUTO-CONNECT: Connected to {}", address);
                self.peers.mark_connected(address);
            }
            Err(err) if err.is_benign() => {
                info!("AUTO-CONNECT: {} ({})", address, err);
            }
            Err(err) => {
                warn!(
                    code = err.error_code(),
                    retry = err.is_recoverable(),
                    "AUTO-CONNECT: Failed with {}: {}",
                    address,
                    err
                );
                self.peers.record_failure(address, err.to_string());
            }
        }
    }

    /// Start a scan; it is stopped by [`Coordinator::finish_scan`] once the
    /// scan duration has passed. Overlapping scans are skipped.
    pub async fn scan_once(&mut self) {
        if self.discovery_deadline.is_some() {
            debug!("SCAN: Previous scan still running, skipping");
            return;
        }

        info!("SCAN: Starting discovery...");
        match self.backend.start_discovery().await {
            Ok(()) => {
                self.discovery_deadline = Some(Instant::now() + self.settings.scan_duration);
            }
            Err(err) if err.is_benign() => {
                info!("SCAN: Discovery already in progress");
            }
            Err(err) => warn!("SCAN: Error: {}", err),
        }
    }

    /// Stop the running scan and report what is known.
    pub async fn finish_scan(&mut self) {
        self.discovery_deadline = None;
        if let Err(err) = self.backend.stop_discovery().await {
            warn!("SCAN: Error: {}", err);
            return;
        }
        info!("SCAN: Complete. Found {} Geogram device(s)", self.peers.len());
    }

    /// Log the local name and every known peer.
    pub fn log_status(&self) {
        info!("{}", "=".repeat(50));
        info!("STATUS: {}", self.naming.local_name());
        info!("  Discovered Geogram devices: {}", self.peers.len());
        for line in self.peers.summary_lines() {
            info!("  {}", line);
        }
        for record in self.peers.iter() {
            debug!(
                address = %record.address,
                first_seen = %record.first_seen,
                last_seen = %record.last_seen,
                last_failure = record.last_failure.as_deref().unwrap_or("-"),
                "Peer detail"
            );
        }
        info!(
            "  Agent requests answered: {}",
            self.agent.requests_answered()
        );
        info!("{}", "=".repeat(50));
    }

    /// Run the decision over devices BlueZ already knows about, so peers
    /// bonded in an earlier run are reconnected without waiting for a scan.
    pub async fn sweep_known_devices(&mut self) {
        match self.backend.devices().await {
            Ok(devices) => {
                for device in devices {
                    self.handle_device(&device).await;
                }
            }
            Err(err) => debug!("Could not list known devices: {}", err),
        }
    }

    /// Run until a stop is requested (signal, test-mode deadline or agent
    /// release), then clean up.
    ///
    /// # Errors
    ///
    /// Returns an error only if the adapter cannot be configured.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting Geogram Bluetooth daemon...");
        info!("  Device name: {}", self.naming.local_name());

        self.setup_adapter().await?;

        if !self.register_agent().await {
            warn!("Running without agent - pairing may require interaction");
        }

        let mut events = match self.backend.events().await {
            Ok(events) => Some(events),
            Err(err) => {
                warn!("Device notifications unavailable: {}", err);
                None
            }
        };

        self.sweep_known_devices().await;

        let now = Instant::now();
        let mut scan_tick = time::interval(self.settings.scan_interval);
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_tick = time::interval_at(
            now + self.settings.status_interval,
            self.settings.status_interval,
        );
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let test_deadline = self.settings.test_duration.map(|duration| now + duration);

        info!("Daemon running. Ctrl+C to stop.");

        let stop = self.stop.clone();
        loop {
            let scan_deadline = self.discovery_deadline;
            tokio::select! {
                () = stop.stopped() => {
                    info!("Stopping daemon...");
                    break;
                }
                event = next_event(&mut events) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Notification channel closed");
                        events = None;
                    }
                },
                _ = scan_tick.tick() => self.scan_once().await,
                () = sleep_until_opt(scan_deadline) => self.finish_scan().await,
                _ = status_tick.tick() => self.log_status(),
                () = sleep_until_opt(test_deadline) => {
                    info!("Test duration elapsed");
                    stop.request_stop();
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Undo what the loop set up and print the final summary.
    pub async fn cleanup(&mut self) {
        info!("Cleaning up...");

        if self.discovery_deadline.take().is_some() {
            if let Err(err) = self.backend.stop_discovery().await {
                debug!("Stopping discovery: {}", err);
            }
        }

        disable_discoverable(&self.backend).await;

        if let Err(err) = self.backend.unregister_agent().await {
            debug!("Unregistering agent: {}", err);
        }

        self.log_status();
        info!("Daemon stopped");
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<BluezEvent>>) -> Option<BluezEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}
