use airhop_core::{Credentials, Platform, Role, TransferMode, resolve_role};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    BleExchange, BleTransport, Characteristic, PeerDevice, SERVICE_UUID, utf8_value,
};
use crate::{
    SessionError, SessionOptions,
    network::{self, NetworkLease, WifiProvider},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralState {
    Idle,
    Scanning,
    Bonding,
    DiscoveringServices,
    ExchangingOs,
    ExchangingCredentials,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    Start,
    DeviceFound,
    Bonded,
    /// UUIDs of the characteristics found under the service.
    ServicesDiscovered(Vec<String>),
    PeerOs(String),
    OsWritten,
    CredentialsExchanged,
    Error(String),
}

/// The single GATT operation (or terminal outcome) to perform next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEffect {
    Scan,
    Bond,
    Discover,
    ReadOs,
    WriteOs,
    ExchangeCredentials,
    Done,
    Abort(String),
}

pub fn central_transition(
    state: CentralState,
    event: CentralEvent,
) -> (CentralState, CentralEffect) {
    use CentralEffect as E;
    use CentralEvent as Ev;
    use CentralState as S;

    match (state, event) {
        (S::Ready | S::Failed(_), _) => {
            let reason = "event after exchange finished".to_owned();
            (S::Failed(reason.clone()), E::Abort(reason))
        }
        (_, Ev::Error(reason)) => (S::Failed(reason.clone()), E::Abort(reason)),
        (S::Idle, Ev::Start) => (S::Scanning, E::Scan),
        (S::Scanning, Ev::DeviceFound) => (S::Bonding, E::Bond),
        (S::Bonding, Ev::Bonded) => (S::DiscoveringServices, E::Discover),
        (S::DiscoveringServices, Ev::ServicesDiscovered(found)) => {
            let missing: Vec<_> = Characteristic::ALL
                .into_iter()
                .filter(|c| !found.iter().any(|uuid| uuid.eq_ignore_ascii_case(c.uuid())))
                .map(|c| format!("{c:?}"))
                .collect();
            if missing.is_empty() {
                (S::ExchangingOs, E::ReadOs)
            } else {
                let reason = format!("service is missing characteristics: {}", missing.join(", "));
                (S::Failed(reason.clone()), E::Abort(reason))
            }
        }
        (S::ExchangingOs, Ev::PeerOs(value)) => match value.parse::<Platform>() {
            Ok(_) => (S::ExchangingOs, E::WriteOs),
            Err(err) => (S::Failed(err.to_string()), E::Abort(err.to_string())),
        },
        (S::ExchangingOs, Ev::OsWritten) => (S::ExchangingCredentials, E::ExchangeCredentials),
        (S::ExchangingCredentials, Ev::CredentialsExchanged) => (S::Ready, E::Done),
        (state, event) => {
            let reason = format!("unexpected {event:?} while {state:?}");
            (S::Failed(reason.clone()), E::Abort(reason))
        }
    }
}

/// Scan for the advertising peer and exchange credentials with it.
pub async fn run_central<B, W>(
    ble: &B,
    wifi: &W,
    local: Platform,
    mode: TransferMode,
    lease: &NetworkLease,
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<BleExchange, SessionError>
where
    B: BleTransport,
    W: WifiProvider,
{
    let result = drive_central(ble, wifi, local, mode, lease, options, cancel).await;

    // Leave the link either way; the peer waits for it to drop.
    if let Err(err) = ble.disconnect().await {
        warn!("ble disconnect failed: {err}");
    }
    result
}

async fn drive_central<B, W>(
    ble: &B,
    wifi: &W,
    local: Platform,
    mode: TransferMode,
    lease: &NetworkLease,
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<BleExchange, SessionError>
where
    B: BleTransport,
    W: WifiProvider,
{
    let mut device: Option<PeerDevice> = None;
    let mut peer: Option<Platform> = None;
    let mut outcome: Option<(Role, Credentials)> = None;
    let (mut state, mut effect) = central_transition(CentralState::Idle, CentralEvent::Start);

    loop {
        debug!(?state, ?effect, "ble central step");
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let step = match &effect {
            CentralEffect::Scan => {
                info!("scanning for peer");
                let found = ble.scan(SERVICE_UUID).await?;
                info!(device = %found.id, "found peer");
                device = Some(found);
                CentralEvent::DeviceFound
            }
            CentralEffect::Bond => {
                ble.bond(connected(&device)?).await?;
                CentralEvent::Bonded
            }
            CentralEffect::Discover => {
                CentralEvent::ServicesDiscovered(ble.discover(connected(&device)?, SERVICE_UUID).await?)
            }
            CentralEffect::ReadOs => {
                let raw = ble.read(connected(&device)?, Characteristic::Os).await?;
                let value = utf8_value(Characteristic::Os, raw)?;
                peer = value.parse().ok();
                CentralEvent::PeerOs(value)
            }
            CentralEffect::WriteOs => {
                ble.write(connected(&device)?, Characteristic::Os, local.wire_name().as_bytes())
                    .await?;
                CentralEvent::OsWritten
            }
            CentralEffect::ExchangeCredentials => {
                let peer = peer.ok_or_else(|| SessionError::Ble("peer platform unknown".to_owned()))?;
                let role = resolve_role(local, peer, mode)?;
                info!(%peer, ?role, "role resolved");
                let device = connected(&device)?;
                let credentials = match role {
                    Role::Hosting => publish_credentials(ble, wifi, device, lease, cancel).await?,
                    Role::Joining => poll_credentials(ble, device, options, cancel).await?,
                };
                outcome = Some((role, credentials));
                CentralEvent::CredentialsExchanged
            }
            CentralEffect::Done => break,
            CentralEffect::Abort(reason) => {
                return Err(SessionError::Ble(reason.clone()));
            }
        };
        (state, effect) = central_transition(state, step);
    }

    match (peer, outcome) {
        (Some(peer), Some((role, credentials))) => Ok(BleExchange {
            peer,
            role,
            credentials,
        }),
        _ => Err(SessionError::Ble(format!("exchange ended in {state:?}"))),
    }
}

fn connected(device: &Option<PeerDevice>) -> Result<&PeerDevice, SessionError> {
    device
        .as_ref()
        .ok_or_else(|| SessionError::Ble("no connected device".to_owned()))
}

/// Hosting central: bring the hotspot up first, then hand the credentials over.
async fn publish_credentials<B, W>(
    ble: &B,
    wifi: &W,
    device: &PeerDevice,
    lease: &NetworkLease,
    cancel: &CancellationToken,
) -> Result<Credentials, SessionError>
where
    B: BleTransport,
    W: WifiProvider,
{
    let credentials = network::start_hosting(wifi, lease, cancel).await?;
    ble.write(device, Characteristic::Ssid, credentials.ssid().as_bytes())
        .await?;
    ble.write(device, Characteristic::Password, credentials.password().as_bytes())
        .await?;
    info!("credentials sent to peer");
    Ok(credentials)
}

/// Joining central: the peer may still be starting its hotspot, in which case
/// `SSID` reads back empty. Poll at a fixed interval up to the configured limit.
async fn poll_credentials<B: BleTransport>(
    ble: &B,
    device: &PeerDevice,
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<Credentials, SessionError> {
    let mut ssid = None;
    for attempt in 1..=options.ble_poll_limit {
        let raw = ble.read(device, Characteristic::Ssid).await?;
        let value = utf8_value(Characteristic::Ssid, raw)?;
        if !value.is_empty() {
            ssid = Some(value);
            break;
        }
        debug!(attempt, "peer credentials not ready yet");
        if attempt < options.ble_poll_limit {
            tokio::select! {
                _ = tokio::time::sleep(options.ble_poll_interval) => {}
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            }
        }
    }
    let ssid = ssid.ok_or(SessionError::CredentialTimeout {
        attempts: options.ble_poll_limit,
    })?;

    let raw = ble.read(device, Characteristic::Password).await?;
    let password = utf8_value(Characteristic::Password, raw)?;
    if password.is_empty() {
        return Err(SessionError::Ble("peer published an SSID without a password".to_owned()));
    }
    info!(%ssid, "received credentials from peer");
    Ok(Credentials::new(&ssid, &password)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{OS_UUID, PASSWORD_UUID, SSID_UUID};

    fn all_characteristics() -> Vec<String> {
        vec![OS_UUID.to_owned(), SSID_UUID.to_owned(), PASSWORD_UUID.to_owned()]
    }

    #[test]
    fn happy_path_walks_every_state() {
        let steps = [
            (CentralEvent::Start, CentralState::Scanning, CentralEffect::Scan),
            (CentralEvent::DeviceFound, CentralState::Bonding, CentralEffect::Bond),
            (
                CentralEvent::Bonded,
                CentralState::DiscoveringServices,
                CentralEffect::Discover,
            ),
            (
                CentralEvent::ServicesDiscovered(all_characteristics()),
                CentralState::ExchangingOs,
                CentralEffect::ReadOs,
            ),
            (
                CentralEvent::PeerOs("android".to_owned()),
                CentralState::ExchangingOs,
                CentralEffect::WriteOs,
            ),
            (
                CentralEvent::OsWritten,
                CentralState::ExchangingCredentials,
                CentralEffect::ExchangeCredentials,
            ),
            (
                CentralEvent::CredentialsExchanged,
                CentralState::Ready,
                CentralEffect::Done,
            ),
        ];
        let mut state = CentralState::Idle;
        for (event, expected_state, expected_effect) in steps {
            let (next, effect) = central_transition(state, event);
            assert_eq!(next, expected_state);
            assert_eq!(effect, expected_effect);
            state = next;
        }
    }

    #[test]
    fn missing_characteristic_fails() {
        let (state, effect) = central_transition(
            CentralState::DiscoveringServices,
            CentralEvent::ServicesDiscovered(vec![OS_UUID.to_owned(), SSID_UUID.to_owned()]),
        );
        assert!(matches!(state, CentralState::Failed(_)));
        assert!(matches!(effect, CentralEffect::Abort(reason) if reason.contains("Password")));
    }

    #[test]
    fn unknown_peer_os_fails() {
        let (state, _) =
            central_transition(CentralState::ExchangingOs, CentralEvent::PeerOs("beos".to_owned()));
        assert!(matches!(state, CentralState::Failed(_)));
    }

    #[test]
    fn errors_and_out_of_order_events_fail() {
        let (state, _) =
            central_transition(CentralState::Scanning, CentralEvent::Error("scan failed".to_owned()));
        assert_eq!(state, CentralState::Failed("scan failed".to_owned()));

        let (state, _) = central_transition(CentralState::Idle, CentralEvent::Bonded);
        assert!(matches!(state, CentralState::Failed(_)));
    }
}
