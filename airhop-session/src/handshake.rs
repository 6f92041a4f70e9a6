use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use airhop_core::{Role, TransferMode};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpSocket, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    SessionError, SessionOptions,
    codec::{read_flag, read_u64, write_flag, write_u64},
};

const MAX_CONNECT_ATTEMPTS: u32 = 8;
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_MAX_MS: u64 = 4_000;

/// Socket buffers sized to hold two full chunks so a chunk in flight never
/// stalls on a full window.
fn socket_buffer_len(chunk_size: usize) -> u32 {
    u32::try_from(chunk_size.saturating_mul(2)).unwrap_or(u32::MAX)
}

fn new_socket(addr: &SocketAddr, chunk_size: usize) -> Result<TcpSocket, SessionError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    let buffer_len = socket_buffer_len(chunk_size);
    if let Err(err) = socket.set_send_buffer_size(buffer_len) {
        warn!("could not size send buffer: {}", err);
    }
    if let Err(err) = socket.set_recv_buffer_size(buffer_len) {
        warn!("could not size receive buffer: {}", err);
    }
    Ok(socket)
}

/// Hosting listens and accepts exactly one peer; joining connects to the
/// address learned while joining the network.
pub async fn open_transport(
    role: Role,
    peer_ip: Option<IpAddr>,
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<TcpStream, SessionError> {
    match role {
        Role::Hosting => accept_one(options, cancel).await,
        Role::Joining => {
            let ip = peer_ip.ok_or_else(|| {
                SessionError::Network("joined network did not report a peer address".to_owned())
            })?;
            connect_with_retry(SocketAddr::new(ip, options.port), options, cancel).await
        }
    }
}

async fn accept_one(
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<TcpStream, SessionError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), options.port);
    let socket = new_socket(&addr, options.chunk_size)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1)?;
    info!(%addr, "waiting for peer connection");

    let (stream, peer_addr) = tokio::select! {
        accepted = listener.accept() => accepted?,
        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
    };
    // The listener drops here, releasing the port.
    info!(%peer_addr, "peer connected");
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn connect_with_retry(
    addr: SocketAddr,
    options: &SessionOptions,
    cancel: &CancellationToken,
) -> Result<TcpStream, SessionError> {
    let mut attempt: u32 = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        info!(attempt, max_attempts = MAX_CONNECT_ATTEMPTS, %addr, "connecting to peer");
        let socket = new_socket(&addr, options.chunk_size)?;
        let result = tokio::select! {
            connected = socket.connect(addr) => connected,
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        };
        match result {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                info!(%addr, "connected to peer");
                return Ok(stream);
            }
            Err(err) if attempt < MAX_CONNECT_ATTEMPTS => {
                warn!(attempt, %addr, "connect failed: {err}");
            }
            Err(err) => {
                return Err(SessionError::Network(format!(
                    "could not connect to {addr} after {attempt} attempts: {err}"
                )));
            }
        }
        let backoff_ms = BACKOFF_BASE_MS
            .saturating_mul(1_u64 << (attempt - 1))
            .min(BACKOFF_MAX_MS);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        }
        attempt += 1;
    }
}

/// Versions compatible with `local` when `peer` is newer or older.
pub fn is_compatible(local: u64, peer: u64) -> bool {
    local == peer
}

/// Exchange protocol versions. When they differ, the side running the older
/// version decides and writes its verdict; the newer side honours it.
pub async fn negotiate_version<S>(stream: &mut S, local: u64) -> Result<u64, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_u64(stream, local).await?;
    let peer = read_u64(stream).await?;

    if peer < local {
        if !read_flag(stream).await? {
            return Err(SessionError::VersionIncompatible { local, peer });
        }
    } else if peer > local {
        let compatible = is_compatible(local, peer);
        write_flag(stream, compatible).await?;
        if !compatible {
            return Err(SessionError::VersionIncompatible { local, peer });
        }
    }
    Ok(peer)
}

/// Confirm that exactly one end is sending. The host judges; the joiner obeys.
pub async fn negotiate_mode<S>(
    stream: &mut S,
    role: Role,
    mode: TransferMode,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match role {
        Role::Joining => {
            write_u64(stream, mode.wire_value()).await?;
            if !read_flag(stream).await? {
                return Err(SessionError::ModeConflict(mode));
            }
        }
        Role::Hosting => {
            let raw = read_u64(stream).await?;
            let peer_mode = TransferMode::from_wire(raw)
                .ok_or_else(|| SessionError::Protocol(format!("unknown transfer mode {raw}")))?;
            if peer_mode == mode {
                write_flag(stream, false).await?;
                return Err(SessionError::ModeConflict(mode));
            }
            write_flag(stream, true).await?;
        }
    }
    Ok(())
}

pub async fn handshake<S>(
    stream: &mut S,
    role: Role,
    mode: TransferMode,
    options: &SessionOptions,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer_version = negotiate_version(stream, options.protocol_version).await?;
    info!(peer_version, "protocol version confirmed");
    negotiate_mode(stream, role, mode).await?;
    info!(?role, %mode, "transfer mode confirmed");
    Ok(())
}
