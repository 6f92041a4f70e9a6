use std::time::Instant;

use airhop_core::{ChunkCipher, wire};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{FileDescriptor, ProgressMeter, TransferStats, ensure_active, hash_file};
use crate::{
    EventSender, SessionError, SessionEvent, SessionOptions,
    codec::{read_flag, read_u64, write_bytes, write_u64},
    emit,
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SendReport {
    pub sent: u64,
    pub skipped: u64,
    pub bytes: u64,
    pub data_chunks: u64,
}

pub async fn send_files<S>(
    stream: &mut S,
    files: &[FileDescriptor],
    cipher: &ChunkCipher,
    options: &SessionOptions,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<SendReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ensure_active(cancel)?;
    write_u64(stream, files.len() as u64).await?;

    let mut report = SendReport::default();
    let total = files.len() as u64;
    for (index, file) in files.iter().enumerate() {
        let name = file.wire_path();
        info!(file = %name, size = file.size, "sending file {} of {}", index + 1, total);
        emit(
            events,
            SessionEvent::FileStarted {
                index: index as u64 + 1,
                total,
                name: name.clone(),
                size: file.size,
            },
        );

        match send_file(stream, file, &name, cipher, options, cancel, events).await? {
            Some((stats, chunks)) => {
                report.sent += 1;
                report.bytes += stats.bytes;
                report.data_chunks += chunks;
                info!(file = %name, "sent {}", stats.summary());
                emit(events, SessionEvent::FileCompleted { name, stats });
            }
            None => {
                report.skipped += 1;
                info!(file = %name, "receiver already has this file, skipping");
                emit(events, SessionEvent::FileSkipped { name });
            }
        }
    }
    Ok(report)
}

/// Returns `None` when the receiver proved it already holds identical content.
async fn send_file<S>(
    stream: &mut S,
    file: &FileDescriptor,
    name: &str,
    cipher: &ChunkCipher,
    options: &SessionOptions,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<Option<(TransferStats, u64)>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    ensure_active(cancel)?;
    write_bytes(stream, &wire::encode_file_header(name, file.size)?).await?;

    if read_flag(stream).await? {
        let digest = hash_file(&file.source).await?;
        write_bytes(stream, &digest).await?;
        if read_flag(stream).await? {
            return Ok(None);
        }
        debug!(file = %name, "receiver copy differs, sending anyway");
    }

    let mut handle = File::open(&file.source)
        .await
        .map_err(|err| SessionError::file_system(&file.source, err))?;
    let mut buffer = vec![0_u8; options.chunk_size];
    let mut bytes_left = file.size;
    let mut meter = ProgressMeter::new(file.size);
    let mut chunks: u64 = 0;

    while bytes_left > 0 {
        ensure_active(cancel)?;
        let want = bytes_left.min(options.chunk_size as u64) as usize;
        let filled = fill_buffer(&mut handle, &mut buffer[..want])
            .await
            .map_err(|err| SessionError::file_system(&file.source, err))?;
        if filled < want {
            return Err(SessionError::SizeMismatch {
                expected: file.size,
                actual: file.size - bytes_left + filled as u64,
            });
        }

        let chunk = cipher.encrypt(&buffer[..filled])?;
        write_bytes(stream, &wire::encode_chunk_frame(&chunk)).await?;
        chunks += 1;
        bytes_left -= filled as u64;
        if let Some(percent) = meter.advance(filled as u64) {
            emit(events, SessionEvent::Progress { percent });
        }
    }

    write_u64(stream, wire::END_OF_FILE).await?;
    read_u64(stream).await?;

    let stats = TransferStats {
        bytes: file.size,
        elapsed: start.elapsed(),
    };
    write_u64(stream, wire::FLAG_TRUE).await?;
    Ok(Some((stats, chunks)))
}

/// Read until `buf` is full or the file ends.
async fn fill_buffer(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
