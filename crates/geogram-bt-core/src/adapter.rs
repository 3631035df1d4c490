//! Local adapter setup and teardown.

use std::sync::Arc;

use tracing::{info, warn};

use crate::actions::register_agent_quietly;
use crate::agent::AutoAcceptAgent;
use crate::backend::BluezBackend;
use crate::error::Result;
use crate::types::{AdapterInfo, AdapterProperty};

/// Properties the daemon applies at startup: powered, advertising `alias`,
/// discoverable and pairable with neither ever timing out.
#[must_use]
pub fn daemon_properties(alias: &str) -> Vec<AdapterProperty> {
    vec![
        AdapterProperty::Powered(true),
        AdapterProperty::Alias(alias.to_string()),
        AdapterProperty::Discoverable(true),
        AdapterProperty::Pairable(true),
        AdapterProperty::DiscoverableTimeout(0),
        AdapterProperty::PairableTimeout(0),
    ]
}

async fn apply<B: BluezBackend>(backend: &B, properties: Vec<AdapterProperty>) -> Result<()> {
    for property in properties {
        backend.set_adapter_property(property).await?;
    }
    Ok(())
}

/// Configure the adapter for unattended auto-pairing and return its state
/// as read back from BlueZ.
///
/// # Errors
///
/// Returns the first property write or read that fails.
pub async fn configure_for_daemon<B: BluezBackend>(backend: &B, alias: &str) -> Result<AdapterInfo> {
    apply(backend, daemon_properties(alias)).await?;

    let adapter = backend.adapter_info().await?;
    info!(
        name = %adapter.alias,
        address = %adapter.address,
        "Adapter configured"
    );
    Ok(adapter)
}

/// Turn the radio on.
///
/// # Errors
///
/// Returns an error if BlueZ rejects the write.
pub async fn power_on<B: BluezBackend>(backend: &B) -> Result<()> {
    backend
        .set_adapter_property(AdapterProperty::Powered(true))
        .await
}

/// Make the adapter visible and pairable indefinitely.
///
/// # Errors
///
/// Returns the first property write that fails.
pub async fn make_discoverable<B: BluezBackend>(backend: &B) -> Result<()> {
    apply(
        backend,
        vec![
            AdapterProperty::Discoverable(true),
            AdapterProperty::Pairable(true),
            AdapterProperty::DiscoverableTimeout(0),
        ],
    )
    .await
}

/// Power on, register `agent` and make the adapter discoverable, for the
/// serving agent. The alias is left as the system set it.
///
/// # Errors
///
/// Returns the first property write that fails. A refused agent is only
/// logged.
pub async fn configure_for_serve<B: BluezBackend>(
    backend: &B,
    agent: Arc<AutoAcceptAgent>,
) -> Result<AdapterInfo> {
    power_on(backend).await?;
    info!("Adapter powered on");

    register_agent_quietly(backend, agent).await;

    make_discoverable(backend).await?;
    backend.adapter_info().await
}

/// Stop advertising on shutdown. Failures are only logged.
pub async fn disable_discoverable<B: BluezBackend>(backend: &B) {
    match backend
        .set_adapter_property(AdapterProperty::Discoverable(false))
        .await
    {
        Ok(()) => info!("Discoverable disabled"),
        Err(err) => warn!(%err, "Failed to disable discoverable"),
    }
}
