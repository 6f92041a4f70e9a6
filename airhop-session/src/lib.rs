pub mod ble;
pub mod codec;
pub mod handshake;
pub mod network;
pub mod oob;
pub mod session;
pub mod transfer;

use std::{io, path::PathBuf, time::Duration};

use airhop_core::{
    CHUNK_SIZE, CoreError, DEFAULT_PORT, PROTOCOL_VERSION, Platform, Role, TransferMode,
};
use thiserror::Error;

pub use ble::{BleExchange, BleTransport, Characteristic, GattRequest, NoBle, PeerDevice};
pub use network::{HotspotConfig, NetworkLease, WifiProvider};
pub use oob::{CredentialSource, OobInput};
pub use session::{
    Collaborators, CredentialStrategy, Direction, SessionHandle, SessionRequest, SessionSlot,
    SessionSummary, spawn_session,
};
pub use transfer::{TransferStats, format_duration, format_size};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("bluetooth unavailable: {0}")]
    BleUnavailable(String),
    #[error("bluetooth exchange failed: {0}")]
    Ble(String),
    #[error(
        "peer runs protocol version {peer}, which is not compatible with version {local}; update both devices"
    )]
    VersionIncompatible { local: u64, peer: u64 },
    #[error("both ends of the transfer selected {0}")]
    ModeConflict(TransferMode),
    #[error("peer connection closed")]
    ConnectionClosed,
    #[error("file system error at {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("received {actual} bytes for a file declared as {expected} bytes")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("peer credentials not ready after {attempts} attempts")]
    CredentialTimeout { attempts: u32 },
    #[error("a transfer is already in progress")]
    AlreadyActive,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    pub fn file_system(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SessionError::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Errors that make the session fall back to out-of-band credentials
    /// instead of aborting.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(self, SessionError::BleUnavailable(_))
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub port: u16,
    pub chunk_size: usize,
    pub protocol_version: u64,
    pub ble_poll_interval: Duration,
    pub ble_poll_limit: u32,
    pub final_confirm_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            chunk_size: CHUNK_SIZE,
            protocol_version: PROTOCOL_VERSION,
            ble_poll_interval: Duration::from_secs(1),
            ble_poll_limit: 120,
            final_confirm_timeout: Duration::from_secs(2),
        }
    }
}

/// Everything the UI may want to show. Sent over an unbounded channel so the
/// session task never waits on the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(String),
    PeerResolved {
        peer: Platform,
        role: Role,
    },
    ShowCredentials {
        payload: String,
        as_qr: bool,
    },
    FileStarted {
        index: u64,
        total: u64,
        name: String,
        size: u64,
    },
    FileSkipped {
        name: String,
    },
    Progress {
        percent: u8,
    },
    FileCompleted {
        name: String,
        stats: TransferStats,
    },
    Finished,
    Failed(String),
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<SessionEvent>;

pub(crate) fn emit(events: &EventSender, event: SessionEvent) {
    let _ = events.send(event);
}
