//! Auto-accepting pairing agent.
//!
//! BlueZ calls back into the default agent whenever pairing needs user
//! input. [`AutoAcceptAgent`] answers every prompt immediately with a canned
//! value, which is what makes unattended "Just Works" pairing between
//! Geogram devices possible.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::info;

use crate::shutdown::StopHandle;

/// PIN returned for legacy (pre-2.1) PIN-code pairing.
pub const FIXED_PIN_CODE: &str = "0000";

/// Passkey returned when BlueZ asks us to type one.
pub const FIXED_PASSKEY: u32 = 0;

/// Pairing agent that accepts every request without human input.
#[derive(Debug, Default)]
pub struct AutoAcceptAgent {
    exit_on_release: AtomicBool,
    stop: Option<StopHandle>,
    requests: AtomicU64,
}

impl AutoAcceptAgent {
    /// Create an agent that only logs when released.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an agent that can stop the enclosing event loop on release.
    #[must_use]
    pub fn with_stop_handle(stop: StopHandle, exit_on_release: bool) -> Self {
        Self {
            exit_on_release: AtomicBool::new(exit_on_release),
            stop: Some(stop),
            requests: AtomicU64::new(0),
        }
    }

    /// Choose whether [`AutoAcceptAgent::release`] stops the event loop.
    pub fn set_exit_on_release(&self, exit_on_release: bool) {
        self.exit_on_release.store(exit_on_release, Ordering::SeqCst);
    }

    /// Number of pairing callbacks answered so far.
    #[must_use]
    pub fn requests_answered(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn count(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Allow `device` to use the service identified by `uuid`.
    pub fn authorize_service(&self, device: &str, uuid: &str) {
        self.count();
        info!(%device, %uuid, "[Agent] AuthorizeService -> AUTO-ACCEPT");
    }

    /// Answer a legacy PIN request.
    pub fn request_pin_code(&self, device: &str) -> String {
        self.count();
        info!(%device, "[Agent] RequestPinCode -> {FIXED_PIN_CODE}");
        FIXED_PIN_CODE.to_string()
    }

    /// Answer a passkey entry request.
    pub fn request_passkey(&self, device: &str) -> u32 {
        self.count();
        info!(%device, "[Agent] RequestPasskey -> {FIXED_PASSKEY}");
        FIXED_PASSKEY
    }

    /// Show a passkey the remote side is typing; nothing to do headless.
    pub fn display_passkey(&self, device: &str, passkey: u32, entered: u16) {
        self.count();
        info!(%device, passkey, entered, "[Agent] DisplayPasskey");
    }

    /// Show a PIN the remote side must enter.
    pub fn display_pin_code(&self, device: &str, pin_code: &str) {
        self.count();
        info!(%device, pin = %pin_code, "[Agent] DisplayPinCode");
    }

    /// Confirm a numeric-comparison passkey.
    pub fn request_confirmation(&self, device: &str, passkey: u32) {
        self.count();
        info!(%device, passkey, "[Agent] RequestConfirmation -> AUTO-ACCEPT");
    }

    /// Authorize an incoming pairing that needs no passkey.
    pub fn request_authorization(&self, device: &str) {
        self.count();
        info!(%device, "[Agent] RequestAuthorization -> AUTO-ACCEPT");
    }

    /// BlueZ aborted a pending request.
    pub fn cancel(&self) {
        info!("[Agent] Cancelled");
    }

    /// BlueZ dropped this agent (displaced, unregistered or shutting down).
    pub fn release(&self) {
        info!("[Agent] Released");
        if self.exit_on_release.load(Ordering::SeqCst) {
            if let Some(stop) = &self.stop {
                stop.request_stop();
            }
        }
    }
}

/// Adapt a shared [`AutoAcceptAgent`] into bluer's callback table.
///
/// bluer derives the advertised IO capability from which callbacks are
/// present and answers `Release`/`Cancel` itself; the backend calls
/// [`AutoAcceptAgent::release`] when it drops the registration.
#[cfg(feature = "bluetooth")]
pub fn into_bluer_agent(agent: std::sync::Arc<AutoAcceptAgent>) -> bluer::agent::Agent {
    use bluer::agent::{
        Agent, AuthorizeService, DisplayPasskey, DisplayPinCode, RequestAuthorization,
        RequestConfirmation, RequestPasskey, RequestPinCode,
    };

    let pin = agent.clone();
    let display_pin = agent.clone();
    let passkey = agent.clone();
    let display_passkey = agent.clone();
    let confirm = agent.clone();
    let authorize = agent.clone();
    let service = agent;

    Agent {
        request_default: true,
        request_pin_code: Some(Box::new(move |req: RequestPinCode| {
            let answer = pin.request_pin_code(&req.device.to_string());
            Box::pin(async move { Ok(answer) })
        })),
        display_pin_code: Some(Box::new(move |req: DisplayPinCode| {
            display_pin.display_pin_code(&req.device.to_string(), &req.pincode);
            Box::pin(async move { Ok(()) })
        })),
        request_passkey: Some(Box::new(move |req: RequestPasskey| {
            let answer = passkey.request_passkey(&req.device.to_string());
            Box::pin(async move { Ok(answer) })
        })),
        display_passkey: Some(Box::new(move |req: DisplayPasskey| {
            display_passkey.display_passkey(&req.device.to_string(), req.passkey, req.entered);
            Box::pin(async move { Ok(()) })
        })),
        request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
            confirm.request_confirmation(&req.device.to_string(), req.passkey);
            Box::pin(async move { Ok(()) })
        })),
        request_authorization: Some(Box::new(move |req: RequestAuthorization| {
            authorize.request_authorization(&req.device.to_string());
            Box::pin(async move { Ok(()) })
        })),
        authorize_service: Some(Box::new(move |req: AuthorizeService| {
            service.authorize_service(&req.device.to_string(), &req.service.to_string());
            Box::pin(async move { Ok(()) })
        })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF";

    #[test]
    fn test_every_callback_answers_without_input() {
        let agent = AutoAcceptAgent::new();

        agent.authorize_service(DEVICE, "00001101-0000-1000-8000-00805f9b34fb");
        assert_eq!(agent.request_pin_code(DEVICE), "0000");
        assert_eq!(agent.request_passkey(DEVICE), 0);
        agent.display_passkey(DEVICE, 123_456, 3);
        agent.display_pin_code(DEVICE, "1234");
        agent.request_confirmation(DEVICE, 123_456);
        agent.request_authorization(DEVICE);
        agent.cancel();
        agent.release();

        assert_eq!(agent.requests_answered(), 7);
    }

    #[test]
    fn test_release_without_exit_keeps_loop_running() {
        let stop = StopHandle::new();
        let agent = AutoAcceptAgent::with_stop_handle(stop.clone(), false);

        agent.release();
        assert!(!stop.is_stop_requested());
    }

    #[test]
    fn test_release_with_exit_requests_stop() {
        let stop = StopHandle::new();
        let agent = AutoAcceptAgent::with_stop_handle(stop.clone(), false);
        agent.set_exit_on_release(true);

        agent.release();
        assert!(stop.is_stop_requested());
    }

    #[test]
    fn test_agent_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AutoAcceptAgent>();
    }
}
