use std::{
    net::IpAddr,
    sync::atomic::{AtomicBool, Ordering},
};

use airhop_core::{Credentials, credentials::strip_ssid_quotes};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SessionError;

/// What the platform reports once a local-only hotspot is up.
#[derive(Clone, PartialEq, Eq)]
pub struct HotspotConfig {
    pub ssid: String,
    pub password: String,
}

impl std::fmt::Debug for HotspotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotspotConfig")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// OS WiFi control. Implementations wrap whatever the host platform offers
/// for creating a hotspot and associating with one.
pub trait WifiProvider: Send + Sync {
    fn start_hotspot(&self) -> impl Future<Output = Result<HotspotConfig, SessionError>> + Send;

    fn stop_hotspot(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Associate without internet capability and return the peer's address
    /// (the network gateway). Only the first address of an attempt counts.
    fn join_network(
        &self,
        ssid: &str,
        password: &str,
    ) -> impl Future<Output = Result<IpAddr, SessionError>> + Send;

    fn leave_network(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotspotState {
    Idle,
    Starting,
    Up(HotspotConfig),
    Stopping,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotspotEvent {
    StartRequested,
    Started(HotspotConfig),
    StartFailed(String),
    StopRequested,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotspotEffect {
    RequestStart,
    /// Credentials may now be handed to the credential exchange.
    Publish(HotspotConfig),
    /// Give the reservation back to the OS.
    Release,
    Report(String),
}

/// Hotspot lifecycle. `active` is the live session flag; a `Started` arriving
/// after the session went inactive releases the reservation instead of
/// publishing it.
pub fn hotspot_transition(
    state: HotspotState,
    event: HotspotEvent,
    active: bool,
) -> (HotspotState, Vec<HotspotEffect>) {
    use HotspotEffect as E;
    use HotspotEvent as Ev;
    use HotspotState as S;

    match (state, event) {
        (S::Idle, Ev::StartRequested) if active => (S::Starting, vec![E::RequestStart]),
        (S::Starting, Ev::Started(config)) if active => {
            (S::Up(config.clone()), vec![E::Publish(config)])
        }
        (S::Starting | S::Stopping | S::Stopped | S::Idle, Ev::Started(_)) => {
            (S::Stopping, vec![E::Release])
        }
        (S::Up(_), Ev::Started(_)) if !active => (S::Stopping, vec![E::Release]),
        (S::Starting, Ev::StartFailed(reason)) => {
            (S::Failed(reason.clone()), vec![E::Report(reason)])
        }
        (S::Up(_), Ev::StopRequested) => (S::Stopping, vec![E::Release]),
        (S::Starting, Ev::StopRequested) => (S::Stopping, Vec::new()),
        (S::Stopping, Ev::Stopped) | (S::Up(_), Ev::Stopped) => (S::Stopped, Vec::new()),
        (state, _) => (state, Vec::new()),
    }
}

/// What this session reserved from the OS, so teardown knows what to give
/// back. Release is idempotent.
#[derive(Debug, Default)]
pub struct NetworkLease {
    hotspot: AtomicBool,
    joined: AtomicBool,
}

impl NetworkLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holds_hotspot(&self) -> bool {
        self.hotspot.load(Ordering::SeqCst)
    }

    /// Stop the hotspot and leave the network, whichever were taken. Both are
    /// attempted even if the first fails.
    pub async fn release<W: WifiProvider>(&self, wifi: &W) -> Vec<SessionError> {
        let mut errors = Vec::new();
        if self.hotspot.swap(false, Ordering::SeqCst) {
            info!("stopping hotspot");
            if let Err(err) = wifi.stop_hotspot().await {
                warn!("could not stop hotspot: {err}");
                errors.push(err);
            }
        }
        if self.joined.swap(false, Ordering::SeqCst) {
            info!("leaving network");
            if let Err(err) = wifi.leave_network().await {
                warn!("could not leave network: {err}");
                errors.push(err);
            }
        }
        errors
    }
}

/// Start the hotspot and turn the reported configuration into session
/// credentials. Nothing is returned, and so nothing can be published, before
/// the hotspot is confirmed up.
pub async fn start_hosting<W: WifiProvider>(
    wifi: &W,
    lease: &NetworkLease,
    cancel: &CancellationToken,
) -> Result<Credentials, SessionError> {
    let (state, _) = hotspot_transition(
        HotspotState::Idle,
        HotspotEvent::StartRequested,
        !cancel.is_cancelled(),
    );
    if state != HotspotState::Starting {
        return Err(SessionError::Cancelled);
    }

    info!("starting hotspot");
    lease.hotspot.store(true, Ordering::SeqCst);
    let mut start_error = None;
    let event = match wifi.start_hotspot().await {
        Ok(config) => HotspotEvent::Started(config),
        Err(err) => {
            let reason = err.to_string();
            start_error = Some(err);
            HotspotEvent::StartFailed(reason)
        }
    };
    let (state, effects) = hotspot_transition(state, event, !cancel.is_cancelled());

    for effect in effects {
        match effect {
            HotspotEffect::Publish(config) => {
                let credentials =
                    Credentials::new(strip_ssid_quotes(&config.ssid), &config.password)?;
                info!(ssid = %credentials.ssid(), "hotspot up");
                return Ok(credentials);
            }
            HotspotEffect::Release => {
                warn!("hotspot came up after the session was cancelled, releasing it");
                lease.release(wifi).await;
                return Err(SessionError::Cancelled);
            }
            HotspotEffect::Report(reason) => {
                lease.hotspot.store(false, Ordering::SeqCst);
                warn!("hotspot failed to start: {reason}");
                return Err(start_error.unwrap_or_else(|| {
                    SessionError::Network(format!("hotspot failed to start: {reason}"))
                }));
            }
            HotspotEffect::RequestStart => {}
        }
    }
    Err(SessionError::Network(format!(
        "hotspot ended in unexpected state {state:?}"
    )))
}

pub async fn join<W: WifiProvider>(
    wifi: &W,
    credentials: &Credentials,
    lease: &NetworkLease,
    cancel: &CancellationToken,
) -> Result<IpAddr, SessionError> {
    info!(ssid = %credentials.ssid(), "joining network");
    lease.joined.store(true, Ordering::SeqCst);
    let peer_ip = tokio::select! {
        joined = wifi.join_network(credentials.ssid(), credentials.password()) => joined?,
        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
    };
    info!(%peer_ip, "joined network");
    Ok(peer_ip)
}
