use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use airhop_core::{ChunkCipher, Credentials, Platform, Role, TransferMode, resolve_role};
use tokio::{io::AsyncWriteExt, net::TcpStream, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    EventSender, SessionError, SessionEvent, SessionOptions,
    ble::{self, BleTransport},
    emit, handshake,
    network::{self, NetworkLease, WifiProvider},
    oob::{self, CredentialSource},
    transfer::{self, ensure_active},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Files and folders to send.
    Send(Vec<PathBuf>),
    /// Folder received files are written below.
    Receive(PathBuf),
}

impl Direction {
    pub fn mode(&self) -> TransferMode {
        match self {
            Direction::Send(_) => TransferMode::Send,
            Direction::Receive(_) => TransferMode::Receive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStrategy {
    /// BLE first, out-of-band if the radio is unavailable.
    Ble,
    OutOfBand,
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub local: Platform,
    pub peer: Platform,
    pub direction: Direction,
    pub strategy: CredentialStrategy,
    pub options: SessionOptions,
}

/// Platform services a session drives.
#[derive(Debug)]
pub struct Collaborators<W, B, C> {
    pub wifi: W,
    pub ble: B,
    pub oob: C,
}

/// Allows one session per device at a time.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    active: Arc<AtomicBool>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<SlotGuard, SessionError> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SessionError::AlreadyActive)?;
        Ok(SlotGuard {
            active: Arc::clone(&self.active),
        })
    }
}

struct SlotGuard {
    active: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub peer: Platform,
    pub role: Role,
    pub files: u64,
    pub skipped: u64,
    pub bytes: u64,
    pub data_chunks: u64,
}

pub struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<SessionSummary, SessionError>>,
}

impl SessionHandle {
    /// Request cancellation. Teardown still runs inside the session task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session, including its teardown, to finish.
    pub async fn wait(self) -> Result<SessionSummary, SessionError> {
        self.task
            .await
            .map_err(|err| SessionError::Protocol(format!("session task failed: {err}")))?
    }
}

/// Start a session in the background. Fails with `AlreadyActive` if `slot`
/// already runs one.
pub fn spawn_session<W, B, C>(
    slot: &SessionSlot,
    request: SessionRequest,
    collaborators: Collaborators<W, B, C>,
    events: EventSender,
) -> Result<SessionHandle, SessionError>
where
    W: WifiProvider + 'static,
    B: BleTransport + 'static,
    C: CredentialSource + 'static,
{
    let guard = slot.claim()?;
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_session(
        guard,
        request,
        collaborators,
        events,
        cancel.clone(),
    ));
    Ok(SessionHandle { cancel, task })
}

async fn run_session<W, B, C>(
    guard: SlotGuard,
    request: SessionRequest,
    collaborators: Collaborators<W, B, C>,
    events: EventSender,
    cancel: CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    W: WifiProvider,
    B: BleTransport,
    C: CredentialSource,
{
    let lease = NetworkLease::new();
    let mut transport: Option<TcpStream> = None;

    let result = tokio::select! {
        result = pipeline(&request, &collaborators, &lease, &mut transport, &events, &cancel) => result,
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
    };

    teardown(guard, &collaborators.wifi, &lease, transport, &cancel).await;

    match &result {
        Ok(summary) => {
            info!(files = summary.files, skipped = summary.skipped, bytes = summary.bytes, "session finished");
            emit(&events, SessionEvent::Finished);
        }
        Err(err) => {
            error!("session failed: {err}");
            emit(&events, SessionEvent::Failed(err.to_string()));
        }
    }
    result
}

/// Runs once per session. Every step is attempted regardless of earlier
/// failures. Open files were already closed when the pipeline was dropped.
async fn teardown<W: WifiProvider>(
    guard: SlotGuard,
    wifi: &W,
    lease: &NetworkLease,
    transport: Option<TcpStream>,
    cancel: &CancellationToken,
) {
    cancel.cancel();

    if let Some(mut stream) = transport {
        if let Err(err) = stream.shutdown().await {
            warn!("could not shut down transfer socket: {err}");
        }
    }

    let failures = lease.release(wifi).await;
    if !failures.is_empty() {
        warn!(count = failures.len(), "network teardown incomplete");
    }

    drop(guard);
    info!("session torn down");
}

async fn pipeline<W, B, C>(
    request: &SessionRequest,
    collaborators: &Collaborators<W, B, C>,
    lease: &NetworkLease,
    transport: &mut Option<TcpStream>,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    W: WifiProvider,
    B: BleTransport,
    C: CredentialSource,
{
    let options = &request.options;
    let mode = request.direction.mode();

    // Configuration problems surface before any radio is touched.
    let files = match &request.direction {
        Direction::Send(selection) => transfer::collect_files(selection)?,
        Direction::Receive(_) => Vec::new(),
    };
    resolve_role(request.local, request.peer, mode)?;

    let (peer, role, credentials) = match request.strategy {
        CredentialStrategy::Ble => {
            emit(events, SessionEvent::Status("Looking for peer over Bluetooth".to_owned()));
            match ble::exchange(
                &collaborators.ble,
                &collaborators.wifi,
                request.local,
                mode,
                lease,
                options,
                cancel,
            )
            .await
            {
                Ok(exchange) => {
                    if exchange.peer != request.peer {
                        warn!(expected = %request.peer, found = %exchange.peer, "peer reported a different platform");
                    }
                    (exchange.peer, exchange.role, exchange.credentials)
                }
                Err(err) if err.is_recoverable_by_fallback() => {
                    warn!("{err}, falling back to out-of-band exchange");
                    emit(
                        events,
                        SessionEvent::Status("Bluetooth unavailable, exchange credentials manually".to_owned()),
                    );
                    out_of_band(request, collaborators, lease, events, cancel).await?
                }
                Err(err) => return Err(err),
            }
        }
        CredentialStrategy::OutOfBand => {
            out_of_band(request, collaborators, lease, events, cancel).await?
        }
    };
    info!(%peer, ?role, %mode, "peer resolved");
    emit(events, SessionEvent::PeerResolved { peer, role });

    ensure_active(cancel)?;
    let peer_ip = match role {
        Role::Hosting => None,
        Role::Joining => {
            emit(events, SessionEvent::Status(format!("Joining {}", credentials.ssid())));
            Some(network::join(&collaborators.wifi, &credentials, lease, cancel).await?)
        }
    };

    ensure_active(cancel)?;
    emit(events, SessionEvent::Status("Connecting".to_owned()));
    let stream = transport.insert(handshake::open_transport(role, peer_ip, options, cancel).await?);
    handshake::handshake(stream, role, mode, options).await?;

    let cipher = ChunkCipher::new(credentials.key());
    let summary = match &request.direction {
        Direction::Send(_) => {
            let report =
                transfer::send_files(stream, &files, &cipher, options, cancel, events).await?;
            SessionSummary {
                peer,
                role,
                files: report.sent,
                skipped: report.skipped,
                bytes: report.bytes,
                data_chunks: report.data_chunks,
            }
        }
        Direction::Receive(dest) => {
            let report =
                transfer::receive_files(stream, dest, &cipher, options, cancel, events).await?;
            SessionSummary {
                peer,
                role,
                files: report.received,
                skipped: report.skipped,
                bytes: report.bytes,
                data_chunks: report.data_chunks,
            }
        }
    };
    Ok(summary)
}

async fn out_of_band<W, B, C>(
    request: &SessionRequest,
    collaborators: &Collaborators<W, B, C>,
    lease: &NetworkLease,
    events: &EventSender,
    cancel: &CancellationToken,
) -> Result<(Platform, Role, Credentials), SessionError>
where
    W: WifiProvider,
    B: BleTransport,
    C: CredentialSource,
{
    let role = resolve_role(request.local, request.peer, request.direction.mode())?;
    let credentials = match role {
        Role::Hosting => oob::host(&collaborators.wifi, request.peer, lease, events, cancel).await?,
        Role::Joining => {
            emit(events, SessionEvent::Status("Enter the credentials shown on the other device".to_owned()));
            oob::receive(&collaborators.oob, cancel).await?
        }
    };
    Ok((request.peer, role, credentials))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_session() {
        let slot = SessionSlot::new();
        let guard = slot.claim().unwrap();
        assert!(slot.is_active());
        assert!(matches!(slot.claim(), Err(SessionError::AlreadyActive)));
        drop(guard);
        assert!(!slot.is_active());
        assert!(slot.claim().is_ok());
    }

    #[test]
    fn direction_picks_mode() {
        assert_eq!(Direction::Send(vec![]).mode(), TransferMode::Send);
        assert_eq!(
            Direction::Receive(PathBuf::from("in")).mode(),
            TransferMode::Receive
        );
    }
}
