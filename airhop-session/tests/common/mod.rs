#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use airhop_session::{
    BleTransport, Characteristic, CredentialSource, GattRequest, HotspotConfig, OobInput,
    PeerDevice, SessionError, WifiProvider,
    ble::{OS_UUID, PASSWORD_UUID, SSID_UUID},
};
use tokio::sync::{mpsc, oneshot};

pub const HOTSPOT_SSID: &str = "airhop_test";
pub const HOTSPOT_PASSWORD: &str = "e2e-password";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WifiLog {
    pub started: u32,
    pub stopped: u32,
    pub joined: u32,
    pub left: u32,
    pub joined_ssid: Option<String>,
}

/// Pretends to create or join a network; the "peer" is always on loopback.
#[derive(Debug, Clone, Default)]
pub struct LoopbackWifi {
    log: Arc<Mutex<WifiLog>>,
    start_delay: Duration,
}

impl LoopbackWifi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_delay(start_delay: Duration) -> Self {
        Self {
            start_delay,
            ..Self::default()
        }
    }

    pub fn log(&self) -> WifiLog {
        self.log.lock().expect("wifi log lock").clone()
    }
}

impl WifiProvider for LoopbackWifi {
    async fn start_hotspot(&self) -> Result<HotspotConfig, SessionError> {
        tokio::time::sleep(self.start_delay).await;
        self.log.lock().expect("wifi log lock").started += 1;
        Ok(HotspotConfig {
            ssid: format!("\"{HOTSPOT_SSID}\""),
            password: HOTSPOT_PASSWORD.to_owned(),
        })
    }

    async fn stop_hotspot(&self) -> Result<(), SessionError> {
        self.log.lock().expect("wifi log lock").stopped += 1;
        Ok(())
    }

    async fn join_network(&self, ssid: &str, _password: &str) -> Result<IpAddr, SessionError> {
        let mut log = self.log.lock().expect("wifi log lock");
        log.joined += 1;
        log.joined_ssid = Some(ssid.to_owned());
        Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    async fn leave_network(&self) -> Result<(), SessionError> {
        self.log.lock().expect("wifi log lock").left += 1;
        Ok(())
    }
}

/// Hands over the same input every time it is asked.
#[derive(Debug, Clone)]
pub struct FixedInput(pub OobInput);

impl FixedInput {
    pub fn scanned(text: &str) -> Self {
        Self(OobInput::Scanned(text.to_owned()))
    }
}

impl CredentialSource for FixedInput {
    async fn next_input(&self) -> Result<OobInput, SessionError> {
        Ok(self.0.clone())
    }
}

/// Never produces input; for sides that must not need it.
#[derive(Debug, Clone, Copy)]
pub struct NoInput;

impl CredentialSource for NoInput {
    async fn next_input(&self) -> Result<OobInput, SessionError> {
        Err(SessionError::Protocol("no credential input expected".to_owned()))
    }
}

type Pending = (GattRequest, oneshot::Sender<Vec<u8>>);

fn link_closed() -> SessionError {
    SessionError::Ble("gatt link closed".to_owned())
}

/// Central end of an in-memory GATT connection.
pub struct MockCentral {
    requests: mpsc::UnboundedSender<Pending>,
    next_id: AtomicU64,
}

/// Peripheral end of an in-memory GATT connection.
pub struct MockPeripheral {
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Pending>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>,
}

pub fn gatt_pair() -> (MockCentral, MockPeripheral) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockCentral {
            requests: tx,
            next_id: AtomicU64::new(1),
        },
        MockPeripheral {
            requests: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(HashMap::new()),
        },
    )
}

impl MockCentral {
    async fn roundtrip(&self, build: impl FnOnce(u64) -> GattRequest) -> Result<Vec<u8>, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.requests
            .send((build(id), tx))
            .map_err(|_| link_closed())?;
        rx.await.map_err(|_| link_closed())
    }
}

impl BleTransport for MockCentral {
    async fn advertise(&self, _service: &str) -> Result<(), SessionError> {
        Err(SessionError::Ble("central does not advertise".to_owned()))
    }

    async fn stop_advertising(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn next_request(&self) -> Result<GattRequest, SessionError> {
        Err(SessionError::Ble("central serves no requests".to_owned()))
    }

    async fn respond(&self, _id: u64, _value: Vec<u8>) -> Result<(), SessionError> {
        Err(SessionError::Ble("central serves no requests".to_owned()))
    }

    async fn scan(&self, _service: &str) -> Result<PeerDevice, SessionError> {
        Ok(PeerDevice {
            id: "mock-peripheral".to_owned(),
        })
    }

    async fn bond(&self, _device: &PeerDevice) -> Result<(), SessionError> {
        Ok(())
    }

    async fn discover(
        &self,
        _device: &PeerDevice,
        _service: &str,
    ) -> Result<Vec<String>, SessionError> {
        Ok(vec![
            OS_UUID.to_owned(),
            SSID_UUID.to_owned(),
            PASSWORD_UUID.to_owned(),
        ])
    }

    async fn read(
        &self,
        _device: &PeerDevice,
        characteristic: Characteristic,
    ) -> Result<Vec<u8>, SessionError> {
        self.roundtrip(|id| GattRequest::Read { id, characteristic })
            .await
    }

    async fn write(
        &self,
        _device: &PeerDevice,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), SessionError> {
        let value = value.to_vec();
        self.roundtrip(|id| GattRequest::Write {
            id,
            characteristic,
            value,
        })
        .await
        .map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

impl BleTransport for MockPeripheral {
    async fn advertise(&self, _service: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn next_request(&self) -> Result<GattRequest, SessionError> {
        let (request, reply) = self
            .requests
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(link_closed)?;
        let id = match &request {
            GattRequest::Read { id, .. } | GattRequest::Write { id, .. } => *id,
        };
        self.pending
            .lock()
            .expect("pending lock")
            .insert(id, reply);
        Ok(request)
    }

    async fn respond(&self, id: u64, value: Vec<u8>) -> Result<(), SessionError> {
        let reply = self
            .pending
            .lock()
            .expect("pending lock")
            .remove(&id)
            .ok_or_else(link_closed)?;
        reply.send(value).map_err(|_| link_closed())
    }

    async fn scan(&self, _service: &str) -> Result<PeerDevice, SessionError> {
        Err(SessionError::Ble("peripheral does not scan".to_owned()))
    }

    async fn bond(&self, _device: &PeerDevice) -> Result<(), SessionError> {
        Err(SessionError::Ble("peripheral does not scan".to_owned()))
    }

    async fn discover(
        &self,
        _device: &PeerDevice,
        _service: &str,
    ) -> Result<Vec<String>, SessionError> {
        Err(SessionError::Ble("peripheral does not scan".to_owned()))
    }

    async fn read(
        &self,
        _device: &PeerDevice,
        _characteristic: Characteristic,
    ) -> Result<Vec<u8>, SessionError> {
        Err(SessionError::Ble("peripheral does not scan".to_owned()))
    }

    async fn write(
        &self,
        _device: &PeerDevice,
        _characteristic: Characteristic,
        _value: &[u8],
    ) -> Result<(), SessionError> {
        Err(SessionError::Ble("peripheral does not scan".to_owned()))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

pub fn write_pattern_file(path: &std::path::Path, len: usize, seed: u8) {
    let data: Vec<u8> = (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    std::fs::write(path, data).expect("write fixture file");
}
