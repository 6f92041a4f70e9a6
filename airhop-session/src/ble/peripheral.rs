use std::pin::Pin;

use airhop_core::{Credentials, Platform, Role, TransferMode, resolve_role};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BleExchange, BleTransport, Characteristic, GattRequest, SERVICE_UUID, utf8_value};
use crate::{
    SessionError,
    network::{self, NetworkLease, WifiProvider},
};

/// What the advertising side knows and serves. Reads of `SSID` and `PASSWORD`
/// return empty values until credentials are published.
#[derive(Debug)]
pub struct PeripheralState {
    local: Platform,
    peer: Option<Platform>,
    published: Option<Credentials>,
    received_ssid: Option<String>,
    received_password: Option<String>,
    password_served: bool,
}

impl PeripheralState {
    pub fn new(local: Platform) -> Self {
        Self {
            local,
            peer: None,
            published: None,
            received_ssid: None,
            received_password: None,
            password_served: false,
        }
    }

    pub fn read(&mut self, characteristic: Characteristic) -> Vec<u8> {
        match characteristic {
            Characteristic::Os => self.local.wire_name().as_bytes().to_vec(),
            Characteristic::Ssid => self
                .published
                .as_ref()
                .map(|c| c.ssid().as_bytes().to_vec())
                .unwrap_or_default(),
            Characteristic::Password => match &self.published {
                Some(credentials) => {
                    self.password_served = true;
                    credentials.password().as_bytes().to_vec()
                }
                None => Vec::new(),
            },
        }
    }

    pub fn write(
        &mut self,
        characteristic: Characteristic,
        value: Vec<u8>,
    ) -> Result<(), SessionError> {
        let value = utf8_value(characteristic, value)?;
        match characteristic {
            Characteristic::Os => self.peer = Some(value.parse()?),
            Characteristic::Ssid => self.received_ssid = Some(value),
            Characteristic::Password => self.received_password = Some(value),
        }
        Ok(())
    }

    /// Only call once the local hotspot is confirmed up.
    pub fn publish(&mut self, credentials: Credentials) {
        self.published = Some(credentials);
    }

    pub fn peer(&self) -> Option<Platform> {
        self.peer
    }

    /// Credentials written by a hosting central, once both halves arrived.
    pub fn received_credentials(&self) -> Option<Result<Credentials, SessionError>> {
        match (&self.received_ssid, &self.received_password) {
            (Some(ssid), Some(password)) => {
                Some(Credentials::new(ssid, password).map_err(SessionError::from))
            }
            _ => None,
        }
    }

    /// The central has read our password, so it holds everything it needs.
    pub fn handed_over(&self) -> bool {
        self.password_served
    }
}

/// Advertise the service and answer the central until credentials have moved
/// in one direction or the other.
pub async fn run_peripheral<B, W>(
    ble: &B,
    wifi: &W,
    local: Platform,
    mode: TransferMode,
    lease: &NetworkLease,
    cancel: &CancellationToken,
) -> Result<BleExchange, SessionError>
where
    B: BleTransport,
    W: WifiProvider,
{
    ble.advertise(SERVICE_UUID).await?;
    info!("advertising credential service");

    let result = serve(ble, wifi, local, mode, lease, cancel).await;
    if let Err(err) = ble.stop_advertising().await {
        warn!("could not stop advertising: {err}");
    }
    result
}

type PendingHotspot<'a> = Pin<Box<dyn Future<Output = Result<Credentials, SessionError>> + Send + 'a>>;

async fn serve<B, W>(
    ble: &B,
    wifi: &W,
    local: Platform,
    mode: TransferMode,
    lease: &NetworkLease,
    cancel: &CancellationToken,
) -> Result<BleExchange, SessionError>
where
    B: BleTransport,
    W: WifiProvider,
{
    let mut state = PeripheralState::new(local);
    let mut role: Option<Role> = None;
    // Requests keep being answered while the hotspot starts; SSID and
    // PASSWORD read empty until it is up.
    let mut hotspot: Option<PendingHotspot<'_>> = None;

    loop {
        tokio::select! {
            request = ble.next_request() => {
                let request = request?;
                debug!(?request, "gatt request");
                match request {
                    GattRequest::Read { id, characteristic } => {
                        let value = state.read(characteristic);
                        ble.respond(id, value).await?;
                    }
                    GattRequest::Write {
                        id,
                        characteristic,
                        value,
                    } => {
                        state.write(characteristic, value)?;
                        ble.respond(id, Vec::new()).await?;

                        if characteristic == Characteristic::Os && role.is_none() {
                            let peer = state.peer().ok_or_else(|| {
                                SessionError::Ble("peer platform unknown".to_owned())
                            })?;
                            let resolved = resolve_role(local, peer, mode)?;
                            info!(%peer, role = ?resolved, "role resolved");
                            role = Some(resolved);
                            if resolved == Role::Hosting {
                                hotspot =
                                    Some(Box::pin(network::start_hosting(wifi, lease, cancel)));
                            }
                        }
                    }
                }
            }
            started = hotspot_started(&mut hotspot), if hotspot.is_some() => {
                hotspot = None;
                state.publish(started?);
                debug!("credentials published");
            }
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        }

        let (Some(role), Some(peer)) = (role, state.peer()) else {
            continue;
        };
        let credentials = match role {
            Role::Hosting if state.handed_over() => state.published.clone(),
            Role::Joining => state.received_credentials().transpose()?,
            Role::Hosting => None,
        };
        if let Some(credentials) = credentials {
            info!(%peer, ?role, "credential exchange complete");
            return Ok(BleExchange {
                peer,
                role,
                credentials,
            });
        }
    }
}

async fn hotspot_started(
    hotspot: &mut Option<PendingHotspot<'_>>,
) -> Result<Credentials, SessionError> {
    match hotspot.as_mut() {
        Some(start) => start.await,
        None => std::future::pending().await,
    }
}
