//! Geogram peer tracking.
//!
//! A peer is any remote device whose advertised name is the shared prefix
//! followed by a callsign. Records are created the first time a peer is seen,
//! overwritten with BlueZ's view on every notification and kept for the
//! lifetime of the process.

use chrono::{DateTime, Utc};

use crate::types::DeviceSnapshot;

/// How Geogram devices name themselves on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    prefix: String,
    local_name: String,
}

impl NamingConvention {
    /// Convention for a local device advertising `prefix + callsign`.
    #[must_use]
    pub fn new(prefix: impl Into<String>, callsign: &str) -> Self {
        let prefix = prefix.into();
        let local_name = format!("{prefix}{callsign}");
        Self { prefix, local_name }
    }

    /// Name the local adapter advertises.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Callsign of a peer, or `None` if `name` does not start with the
    /// prefix. A bare prefix is a peer with an empty callsign.
    #[must_use]
    pub fn callsign_of<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())
    }

    /// Whether `name` is the local device's own advertised name.
    #[must_use]
    pub fn is_local(&self, name: &str) -> bool {
        name == self.local_name
    }
}

/// What the coordinator should do next with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAction {
    /// Not bonded yet.
    Pair,
    /// Bonded but no link.
    Connect,
    /// Bonded and connected.
    Nothing,
}

/// Tracked state of one Geogram peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Upper-case hardware address.
    pub address: String,
    /// Advertised name.
    pub name: String,
    /// Name with the prefix stripped.
    pub callsign: String,
    /// Bonded with the local adapter.
    pub paired: bool,
    /// Has an active connection.
    pub connected: bool,
    /// BlueZ object path.
    pub object_path: String,
    /// When the peer was first observed.
    pub first_seen: DateTime<Utc>,
    /// When the peer was last observed.
    pub last_seen: DateTime<Utc>,
    /// Most recent genuine pair/connect failure, cleared by a later success.
    pub last_failure: Option<String>,
}

impl PeerRecord {
    /// Next step for this peer based on what BlueZ last reported.
    #[must_use]
    pub const fn next_action(&self) -> PeerAction {
        match (self.paired, self.connected) {
            (false, _) => PeerAction::Pair,
            (true, false) => PeerAction::Connect,
            (true, true) => PeerAction::Nothing,
        }
    }

    /// Short state label for status output.
    #[must_use]
    pub fn status_label(&self) -> String {
        let mut parts = Vec::new();
        if self.paired {
            parts.push("paired");
        }
        if self.connected {
            parts.push("connected");
        }
        if parts.is_empty() {
            "discovered".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Known peers in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: Vec<PeerRecord>,
}

impl PeerTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record BlueZ's current view of a peer. Returns `true` the first time
    /// the address is seen.
    pub fn observe(&mut self, snapshot: &DeviceSnapshot, callsign: &str) -> bool {
        let now = Utc::now();
        if let Some(record) = self.get_mut(&snapshot.address) {
            record.name.clone_from(&snapshot.name);
            record.callsign = callsign.to_string();
            record.paired = snapshot.paired;
            record.connected = snapshot.connected;
            record.object_path.clone_from(&snapshot.object_path);
            record.last_seen = now;
            return false;
        }

        self.peers.push(PeerRecord {
            address: snapshot.address.clone(),
            name: snapshot.name.clone(),
            callsign: callsign.to_string(),
            paired: snapshot.paired,
            connected: snapshot.connected,
            object_path: snapshot.object_path.clone(),
            first_seen: now,
            last_seen: now,
            last_failure: None,
        });
        true
    }

    /// Mark a peer bonded after a successful Pair.
    pub fn mark_paired(&mut self, address: &str) {
        if let Some(record) = self.get_mut(address) {
            record.paired = true;
            record.last_failure = None;
        }
    }

    /// Mark a peer connected after a successful Connect.
    pub fn mark_connected(&mut self, address: &str) {
        if let Some(record) = self.get_mut(address) {
            record.connected = true;
            record.last_failure = None;
        }
    }

    /// Remember a genuine failure without touching paired/connected.
    pub fn record_failure(&mut self, address: &str, failure: impl Into<String>) {
        if let Some(record) = self.get_mut(address) {
            record.last_failure = Some(failure.into());
        }
    }

    /// Look a peer up by address (case-insensitive).
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&PeerRecord> {
        self.peers
            .iter()
            .find(|record| record.address.eq_ignore_ascii_case(address))
    }

    fn get_mut(&mut self, address: &str) -> Option<&mut PeerRecord> {
        self.peers
            .iter_mut()
            .find(|record| record.address.eq_ignore_ascii_case(address))
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    /// One `"  <name> (<address>): <state>"` line per peer.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|record| {
                format!(
                    "  {} ({}): {}",
                    record.name,
                    record.address,
                    record.status_label()
                )
            })
            .collect()
    }
}
