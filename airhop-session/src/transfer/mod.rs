mod receiver;
mod sender;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use airhop_core::{Digest, sha256_reader, wire};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::SessionError;

pub use receiver::{DedupOutcome, ReceiveReport, receive_files, unique_destination};
pub use sender::{SendReport, send_files};

/// One file selected for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// `/`-separated path below the selected folder, empty for loose files.
    pub relative_path: String,
    pub size: u64,
    pub source: PathBuf,
}

impl FileDescriptor {
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn wire_path(&self) -> String {
        wire::wire_path(&self.relative_path, &self.file_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferStats {
    pub fn megabits_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        8.0 * (self.bytes as f64 / 1_000_000.0) / secs
    }

    pub fn summary(&self) -> String {
        format!(
            "{} in {} ({:.2} Mbps)",
            format_size(self.bytes),
            format_duration(self.elapsed),
            self.megabits_per_second()
        )
    }
}

/// Expand a selection of files and folders into transferable files.
///
/// Loose files keep an empty relative path. Files found under a selected
/// folder get a relative path rooted at that folder's name so the receiver
/// rebuilds the same tree.
pub fn collect_files(selection: &[PathBuf]) -> Result<Vec<FileDescriptor>, SessionError> {
    let mut files = Vec::new();
    for path in selection {
        let meta = fs::metadata(path).map_err(|err| SessionError::file_system(path, err))?;
        if meta.is_dir() {
            let root = path.parent().unwrap_or_else(|| Path::new(""));
            walk_folder(path, root, &mut files)?;
        } else {
            files.push(FileDescriptor {
                relative_path: String::new(),
                size: meta.len(),
                source: path.clone(),
            });
        }
    }
    Ok(files)
}

fn walk_folder(
    dir: &Path,
    root: &Path,
    out: &mut Vec<FileDescriptor>,
) -> Result<(), SessionError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|err| SessionError::file_system(dir, err))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();

    for path in entries {
        let link = fs::symlink_metadata(&path)
            .map_err(|err| SessionError::file_system(&path, err))?;
        // Linked folders can loop back on themselves; linked files are sent.
        let meta = if link.file_type().is_symlink() {
            match fs::metadata(&path) {
                Ok(target) if target.is_file() => target,
                Ok(_) => {
                    debug!(path = %path.display(), "skipping linked folder");
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), "skipping broken link: {err}");
                    continue;
                }
            }
        } else {
            link
        };
        if meta.is_dir() {
            walk_folder(&path, root, out)?;
        } else if meta.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            out.push(FileDescriptor {
                relative_path: wire::relative_path_to_wire(relative)?,
                size: meta.len(),
                source: path.clone(),
            });
        }
    }
    Ok(())
}

pub(crate) async fn hash_file(path: &Path) -> Result<Digest, SessionError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = fs::File::open(&owned)?;
        sha256_reader(std::io::BufReader::new(file))
    })
    .await
    .map_err(|err| SessionError::Protocol(format!("hash task failed: {err}")))?
    .map_err(|err| SessionError::file_system(path, err))
}

pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        Err(SessionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Tracks percent-complete and only reports when it changes.
pub(crate) struct ProgressMeter {
    total: u64,
    done: u64,
    last_percent: Option<u8>,
}

impl ProgressMeter {
    pub(crate) fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            last_percent: None,
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.done = self.done.saturating_add(bytes);
        let percent = if self.total == 0 {
            100
        } else {
            ((self.done.min(self.total) as f64 / self.total as f64) * 100.0) as u8
        };
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }
}

pub fn format_size(size: u64) -> String {
    const KB: f64 = 1000.0;
    const MB: f64 = KB * 1000.0;
    const GB: f64 = MB * 1000.0;
    let size = size as f64;
    if size < KB {
        format!("{size} bytes")
    } else if size < MB {
        format!("{:.2}KB", size / KB)
    } else if size < GB {
        format!("{:.2}MB", size / MB)
    } else {
        format!("{:.2}GB", size / GB)
    }
}

pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds > 60.0 {
        let minutes = elapsed.as_secs() / 60;
        format!("{} minutes {:.2} seconds", minutes, seconds % 60.0)
    } else {
        format!("{seconds:.2} seconds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_readable() {
        assert_eq!(format_size(999), "999 bytes");
        assert_eq!(format_size(198_213), "198.21KB");
        assert_eq!(format_size(48_732_394), "48.73MB");
        assert_eq!(format_size(8_273_591_032), "8.27GB");
    }

    #[test]
    fn duration_readable() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50 seconds");
        assert_eq!(
            format_duration(Duration::from_secs(125)),
            "2 minutes 5.00 seconds"
        );
    }

    #[test]
    fn progress_reports_each_percent_once() {
        let mut meter = ProgressMeter::new(1000);
        assert_eq!(meter.advance(5), Some(0));
        assert_eq!(meter.advance(4), None);
        assert_eq!(meter.advance(991), Some(100));
        assert_eq!(ProgressMeter::new(0).advance(0), Some(100));
    }

    #[test]
    fn throughput() {
        let stats = TransferStats {
            bytes: 12_500_000,
            elapsed: Duration::from_secs(2),
        };
        assert!((stats.megabits_per_second() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn folder_selection_keeps_tree() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let album = dir.path().join("album");
        fs::create_dir_all(album.join("nested")).unwrap();
        fs::write(album.join("a.txt"), b"aaa").unwrap();
        fs::write(album.join("nested").join("b.txt"), b"bb").unwrap();
        let loose = dir.path().join("loose.bin");
        fs::write(&loose, b"l").unwrap();

        let files = collect_files(&[album, loose.clone()]).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.wire_path()).collect();
        assert_eq!(paths, vec!["album/a.txt", "album/nested/b.txt", "loose.bin"]);
        assert_eq!(files[1].size, 2);
        assert_eq!(files[2].relative_path, "");
        assert_eq!(files[2].source, loose);
    }
}
