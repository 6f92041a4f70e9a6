use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use airhop_core::{Chunk, ChunkCipher, HASH_LEN, wire};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProgressMeter, TransferStats, ensure_active, hash_file};
use crate::{
    EventSender, SessionError, SessionEvent, SessionOptions,
    codec::{read_bytes, read_u64, write_flag, write_u64},
    emit,
};

const MAX_NAME_ATTEMPTS: u32 = 10_000;
const PARTIAL_SUFFIX: &str = ".airhop-part";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReceiveReport {
    pub received: u64,
    pub skipped: u64,
    pub bytes: u64,
    pub data_chunks: u64,
    pub saved: Vec<PathBuf>,
}

pub async fn receive_files<S>(
    stream: &mut S,
    dest: &Path,
    cipher: &ChunkCipher,
    options: &SessionOptions,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<ReceiveReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ensure_active(cancel)?;
    fs::create_dir_all(dest)
        .await
        .map_err(|err| SessionError::file_system(dest, err))?;

    let total = read_u64(stream).await?;
    info!(total, dest = %dest.display(), "peer announced files");

    let mut report = ReceiveReport::default();
    for index in 1..=total {
        ensure_active(cancel)?;
        let path_len = wire::check_path_len(read_u64(stream).await?)?;
        let name = wire::decode_path(read_bytes(stream, path_len).await?)?;
        let size = read_u64(stream).await?;
        let target = dest.join(wire::safe_relative_path(&name)?);
        info!(file = %name, size, "receiving file {} of {}", index, total);
        emit(
            events,
            SessionEvent::FileStarted {
                index,
                total,
                name: name.clone(),
                size,
            },
        );

        if dedup(stream, &target, size).await? == DedupOutcome::Match {
            report.skipped += 1;
            info!(file = %name, "identical file already present, skipping");
            emit(events, SessionEvent::FileSkipped { name });
            continue;
        }

        let received = receive_file(stream, &target, size, cipher, options, cancel, events).await?;
        write_u64(stream, wire::FLAG_TRUE).await?;

        report.received += 1;
        report.bytes += received.stats.bytes;
        report.data_chunks += received.chunks;
        info!(file = %name, saved = %received.path.display(), "received {}", received.stats.summary());
        emit(
            events,
            SessionEvent::FileCompleted {
                name,
                stats: received.stats,
            },
        );
        report.saved.push(received.path);

        await_confirmation(stream, index == total, options).await?;
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Nothing of that path and size exists locally.
    Absent,
    Match,
    /// Same path and size but different content; the file is transferred again.
    Mismatch,
}

/// Offer a hash comparison when a same-sized file already sits at `target`.
async fn dedup<S>(stream: &mut S, target: &Path, size: u64) -> Result<DedupOutcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let existing_len = match fs::metadata(target).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    };
    if existing_len != Some(size) {
        write_flag(stream, false).await?;
        return Ok(DedupOutcome::Absent);
    }

    write_flag(stream, true).await?;
    let remote = read_bytes(stream, HASH_LEN).await?;
    let local = hash_file(target).await?;
    let matched = remote.as_slice() == local.as_slice();
    write_flag(stream, matched).await?;
    if matched {
        Ok(DedupOutcome::Match)
    } else {
        debug!(
            target = %target.display(),
            local = %hex::encode(local),
            remote = %hex::encode(&remote),
            "local copy differs from sender"
        );
        Ok(DedupOutcome::Mismatch)
    }
}

struct ReceivedFile {
    path: PathBuf,
    stats: TransferStats,
    chunks: u64,
}

async fn receive_file<S>(
    stream: &mut S,
    target: &Path,
    size: u64,
    cipher: &ChunkCipher,
    options: &SessionOptions,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<ReceivedFile, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| SessionError::file_system(parent, err))?;
    }

    let mut partial = PartialFile::create(target).await?;
    let mut meter = ProgressMeter::new(size);
    let mut received: u64 = 0;
    let mut chunks: u64 = 0;

    loop {
        ensure_active(cancel)?;
        let declared = read_u64(stream).await?;
        if declared == wire::END_OF_FILE {
            break;
        }
        let body_len = wire::check_chunk_len(declared, options.chunk_size)?;
        let body = read_bytes(stream, body_len).await?;
        let plaintext = cipher.decrypt(&Chunk::from_wire(&body)?)?;

        received += plaintext.len() as u64;
        if received > size {
            return Err(SessionError::SizeMismatch {
                expected: size,
                actual: received,
            });
        }
        partial.write(&plaintext).await?;
        chunks += 1;
        if let Some(percent) = meter.advance(plaintext.len() as u64) {
            emit(events, SessionEvent::Progress { percent });
        }
    }

    if received != size {
        return Err(SessionError::SizeMismatch {
            expected: size,
            actual: received,
        });
    }
    if size == 0 {
        emit(events, SessionEvent::Progress { percent: 100 });
    }

    let path = unique_destination(target)?;
    partial.persist(&path).await?;
    Ok(ReceivedFile {
        path,
        stats: TransferStats {
            bytes: size,
            elapsed: start.elapsed(),
        },
        chunks,
    })
}

/// The sender confirms every file it streamed. Once the last file is safely on
/// disk a missing confirmation is only worth a warning.
async fn await_confirmation<S>(
    stream: &mut S,
    last: bool,
    options: &SessionOptions,
) -> Result<(), SessionError>
where
    S: AsyncRead + Unpin,
{
    if !last {
        read_u64(stream).await?;
        return Ok(());
    }
    match tokio::time::timeout(options.final_confirm_timeout, read_u64(stream)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(SessionError::ConnectionClosed)) => {
            warn!("peer closed before confirming the last file");
            Ok(())
        }
        Ok(Err(err)) => Err(err),
        Err(_) => {
            warn!("no confirmation for the last file, continuing");
            Ok(())
        }
    }
}

/// First free path among `name.ext`, `name (1).ext`, `name (2).ext`, ...
pub fn unique_destination(target: &Path) -> Result<PathBuf, SessionError> {
    if !target.exists() {
        return Ok(target.to_path_buf());
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    for i in 1..=MAX_NAME_ATTEMPTS {
        let candidate = target.with_file_name(format!("{stem} ({i}){extension}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(SessionError::file_system(
        target,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "no free file name after 10000 attempts",
        ),
    ))
}

/// Incoming bytes land in a hidden sibling file that is only renamed into
/// place once the whole file arrived. Dropping it unpersisted deletes it.
struct PartialFile {
    path: PathBuf,
    file: Option<File>,
}

impl PartialFile {
    async fn create(target: &Path) -> Result<Self, SessionError> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = target.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"));
        let file = File::create(&path)
            .await
            .map_err(|err| SessionError::file_system(&path, err))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let Some(file) = self.file.as_mut() else {
            return Err(SessionError::Protocol("partial file already closed".to_owned()));
        };
        file.write_all(bytes)
            .await
            .map_err(|err| SessionError::file_system(&self.path, err))
    }

    async fn persist(mut self, dest: &Path) -> Result<(), SessionError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|err| SessionError::file_system(&self.path, err))?;
            file.sync_all()
                .await
                .map_err(|err| SessionError::file_system(&self.path, err))?;
        }
        fs::rename(&self.path, dest)
            .await
            .map_err(|err| SessionError::file_system(dest, err))?;
        // Renamed, nothing left for Drop to clean up.
        self.path = PathBuf::new();
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        self.file.take();
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "could not remove partial file: {err}");
        }
    }
}
