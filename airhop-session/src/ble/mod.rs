//! Credential exchange over a single BLE GATT service.
//!
//! The sending device advertises the service (peripheral) and the receiving
//! device scans for it (central). Both exchange platform identifiers through
//! the `OS` characteristic, resolve roles independently, and the hosting side
//! publishes its hotspot credentials through `SSID` and `PASSWORD` once the
//! hotspot is up.

mod central;
mod peripheral;

use airhop_core::{Credentials, Platform, Role, TransferMode};
use tokio_util::sync::CancellationToken;

use crate::{
    SessionError, SessionOptions,
    network::{NetworkLease, WifiProvider},
};

pub use central::{CentralEffect, CentralEvent, CentralState, central_transition, run_central};
pub use peripheral::{PeripheralState, run_peripheral};

pub const SERVICE_UUID: &str = "A70BF3CA-F708-4314-8A0E-5E37C259BE5C";
pub const OS_UUID: &str = "BEE14848-CC55-4FDE-8E9D-2E0F9EC45946";
pub const SSID_UUID: &str = "0D820768-A329-4ED4-8F53-BDF364EDAC75";
pub const PASSWORD_UUID: &str = "E1FA8F66-CF88-4572-9527-D5125A2E0762";

/// The three characteristics of the service. Values are raw UTF-8, an empty
/// value means "not available yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Os,
    Ssid,
    Password,
}

impl Characteristic {
    pub const ALL: [Characteristic; 3] = [
        Characteristic::Os,
        Characteristic::Ssid,
        Characteristic::Password,
    ];

    pub fn uuid(self) -> &'static str {
        match self {
            Characteristic::Os => OS_UUID,
            Characteristic::Ssid => SSID_UUID,
            Characteristic::Password => PASSWORD_UUID,
        }
    }

    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.uuid().eq_ignore_ascii_case(uuid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDevice {
    pub id: String,
}

/// A GATT request arriving at the advertising side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattRequest {
    Read {
        id: u64,
        characteristic: Characteristic,
    },
    Write {
        id: u64,
        characteristic: Characteristic,
        value: Vec<u8>,
    },
}

/// OS BLE primitives. Every call is one GATT operation; callers await each
/// before issuing the next, so at most one is in flight per connection.
pub trait BleTransport: Send + Sync {
    fn advertise(&self, service: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn stop_advertising(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Next read or write from the connected central. Must be cancel safe:
    /// the serve loop drops it whenever the hotspot finishes starting.
    fn next_request(&self) -> impl Future<Output = Result<GattRequest, SessionError>> + Send;

    fn respond(
        &self,
        id: u64,
        value: Vec<u8>,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// First device advertising `service`.
    fn scan(&self, service: &str) -> impl Future<Output = Result<PeerDevice, SessionError>> + Send;

    fn bond(&self, device: &PeerDevice) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Characteristic UUIDs of `service` on `device`.
    fn discover(
        &self,
        device: &PeerDevice,
        service: &str,
    ) -> impl Future<Output = Result<Vec<String>, SessionError>> + Send;

    fn read(
        &self,
        device: &PeerDevice,
        characteristic: Characteristic,
    ) -> impl Future<Output = Result<Vec<u8>, SessionError>> + Send;

    fn write(
        &self,
        device: &PeerDevice,
        characteristic: Characteristic,
        value: &[u8],
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Stand-in for hosts without Bluetooth. Every call reports the radio as
/// unavailable, which makes the session fall back to out-of-band exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBle;

fn unavailable<T>() -> Result<T, SessionError> {
    Err(SessionError::BleUnavailable(
        "no bluetooth adapter on this host".to_owned(),
    ))
}

impl BleTransport for NoBle {
    async fn advertise(&self, _service: &str) -> Result<(), SessionError> {
        unavailable()
    }

    async fn stop_advertising(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn next_request(&self) -> Result<GattRequest, SessionError> {
        unavailable()
    }

    async fn respond(&self, _id: u64, _value: Vec<u8>) -> Result<(), SessionError> {
        unavailable()
    }

    async fn scan(&self, _service: &str) -> Result<PeerDevice, SessionError> {
        unavailable()
    }

    async fn bond(&self, _device: &PeerDevice) -> Result<(), SessionError> {
        unavailable()
    }

    async fn discover(
        &self,
        _device: &PeerDevice,
        _service: &str,
    ) -> Result<Vec<String>, SessionError> {
        unavailable()
    }

    async fn read(
        &self,
        _device: &PeerDevice,
        _characteristic: Characteristic,
    ) -> Result<Vec<u8>, SessionError> {
        unavailable()
    }

    async fn write(
        &self,
        _device: &PeerDevice,
        _characteristic: Characteristic,
        _value: &[u8],
    ) -> Result<(), SessionError> {
        unavailable()
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Result of a completed BLE exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct BleExchange {
    pub peer: Platform,
    pub role: Role,
    pub credentials: Credentials,
}

/// Run the side of the exchange that matches `mode`: senders advertise,
/// receivers scan.
pub async fn exchange<B, W>(
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
    match mode {
        TransferMode::Send => run_peripheral(ble, wifi, local, mode, lease, cancel).await,
        TransferMode::Receive => run_central(ble, wifi, local, mode, lease, options, cancel).await,
    }
}

pub(crate) fn utf8_value(characteristic: Characteristic, value: Vec<u8>) -> Result<String, SessionError> {
    String::from_utf8(value)
        .map_err(|_| SessionError::Ble(format!("{characteristic:?} value is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_lookup_ignores_case() {
        assert_eq!(
            Characteristic::from_uuid(&SSID_UUID.to_ascii_lowercase()),
            Some(Characteristic::Ssid)
        );
        assert_eq!(Characteristic::from_uuid(SERVICE_UUID), None);
    }

    #[tokio::test]
    async fn no_ble_reports_unavailable() {
        let err = NoBle.scan(SERVICE_UUID).await.unwrap_err();
        assert!(err.is_recoverable_by_fallback());
    }
}
