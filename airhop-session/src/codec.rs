use std::io;

use airhop_core::wire::{FLAG_FALSE, FLAG_TRUE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SessionError;

fn map_io(err: io::Error) -> SessionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => SessionError::ConnectionClosed,
        _ => SessionError::Io(err),
    }
}

pub async fn read_u64<R>(reader: &mut R) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin,
{
    reader.read_u64().await.map_err(map_io)
}

/// Reads until `len` bytes arrived; short reads keep reading from the same
/// position until satisfied or the peer closes.
pub async fn read_bytes<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0_u8; len];
    reader.read_exact(&mut buf).await.map_err(map_io)?;
    Ok(buf)
}

pub async fn read_flag<R>(reader: &mut R) -> Result<bool, SessionError>
where
    R: AsyncRead + Unpin,
{
    match read_u64(reader).await? {
        FLAG_TRUE => Ok(true),
        FLAG_FALSE => Ok(false),
        other => Err(SessionError::Protocol(format!(
            "expected boolean flag, got {other}"
        ))),
    }
}

pub async fn write_u64<W>(writer: &mut W, value: u64) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u64(value).await.map_err(map_io)?;
    writer.flush().await.map_err(map_io)
}

pub async fn write_flag<W>(writer: &mut W, value: bool) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    write_u64(writer, airhop_core::wire::flag(value)).await
}

pub async fn write_bytes<W>(writer: &mut W, bytes: &[u8]) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await.map_err(map_io)?;
    writer.flush().await.map_err(map_io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_peer_maps_to_connection_closed() {
        let (mut a, b) = tokio::io::duplex(64);
        drop(b);
        let err = read_u64(&mut a).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectionClosed));
    }

    #[tokio::test]
    async fn short_reads_are_reassembled() {
        // A 3-byte pipe forces every read to come back partial.
        let (mut a, mut b) = tokio::io::duplex(3);
        let payload: Vec<u8> = (0..=255).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            write_u64(&mut a, 256).await.unwrap();
            write_bytes(&mut a, &payload).await.unwrap();
        });
        let len = read_u64(&mut b).await.unwrap();
        let body = read_bytes(&mut b, len as usize).await.unwrap();
        writer.await.unwrap();
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn non_boolean_flag_is_a_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_u64(&mut a, 7).await.unwrap();
        assert!(matches!(
            read_flag(&mut b).await,
            Err(SessionError::Protocol(_))
        ));
    }
}
