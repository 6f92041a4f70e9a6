use std::path::{Component, Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{CHUNK_SIZE, Chunk, CoreError, MAX_PATH_BYTES, NONCE_LEN, TAG_LEN};

// Every length, count and flag on the TCP channel is a u64, big-endian.
pub const FIELD_LEN: usize = 8;
pub const FLAG_FALSE: u64 = 0;
pub const FLAG_TRUE: u64 = 1;
pub const END_OF_FILE: u64 = 0;

pub fn flag(value: bool) -> u64 {
    if value { FLAG_TRUE } else { FLAG_FALSE }
}

/// `[path_len][path][size]`
pub fn encode_file_header(wire_path: &str, size: u64) -> Result<Bytes, CoreError> {
    let path = wire_path.as_bytes();
    if path.is_empty() || path.len() > MAX_PATH_BYTES {
        return Err(CoreError::InvalidFrameLength(path.len() as u64));
    }
    let mut out = BytesMut::with_capacity(FIELD_LEN * 2 + path.len());
    out.put_u64(path.len() as u64);
    out.extend_from_slice(path);
    out.put_u64(size);
    Ok(out.freeze())
}

/// `[body_len][nonce || ciphertext]`
pub fn encode_chunk_frame(chunk: &Chunk) -> Bytes {
    let body_len = NONCE_LEN + chunk.ciphertext.len();
    let mut out = BytesMut::with_capacity(FIELD_LEN + body_len);
    out.put_u64(body_len as u64);
    out.extend_from_slice(&chunk.nonce);
    out.extend_from_slice(&chunk.ciphertext);
    out.freeze()
}

pub fn check_path_len(declared: u64) -> Result<usize, CoreError> {
    if declared == 0 || declared > MAX_PATH_BYTES as u64 {
        return Err(CoreError::InvalidFrameLength(declared));
    }
    Ok(declared as usize)
}

pub fn max_chunk_body(chunk_size: usize) -> usize {
    chunk_size + NONCE_LEN + TAG_LEN
}

/// A zero length is the end-of-file marker and is not passed through here.
pub fn check_chunk_len(declared: u64, chunk_size: usize) -> Result<usize, CoreError> {
    if declared < (NONCE_LEN + TAG_LEN) as u64 || declared > max_chunk_body(chunk_size) as u64 {
        return Err(CoreError::InvalidFrameLength(declared));
    }
    Ok(declared as usize)
}

pub fn decode_path(bytes: Vec<u8>) -> Result<String, CoreError> {
    String::from_utf8(bytes).map_err(|_| CoreError::InvalidPathEncoding)
}

/// Number of data chunks a file of `size` bytes streams as, terminator excluded.
pub fn data_chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}

/// Name a file travels under: its relative path for folder transfers,
/// otherwise its bare file name.
pub fn wire_path(relative_path: &str, file_name: &str) -> String {
    if relative_path.is_empty() {
        file_name.to_owned()
    } else {
        relative_path.to_owned()
    }
}

/// Turn a relative host path into its `/`-separated wire form.
pub fn relative_path_to_wire(path: &Path) -> Result<String, CoreError> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                segments.push(part.to_str().ok_or(CoreError::InvalidPathEncoding)?);
            }
            Component::CurDir => {}
            _ => return Err(CoreError::UnsafePath(path.display().to_string())),
        }
    }
    Ok(segments.join("/"))
}

/// Turn a received `/`-separated path into a relative host path that
/// cannot escape the destination folder.
pub fn safe_relative_path(wire_path: &str) -> Result<PathBuf, CoreError> {
    let normalized = wire_path.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(CoreError::UnsafePath(wire_path.to_owned()));
    }
    if has_drive_prefix(&normalized) {
        return Err(CoreError::UnsafePath(wire_path.to_owned()));
    }
    let mut out = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." | ".." => return Err(CoreError::UnsafePath(wire_path.to_owned())),
            // Colons name alternate data streams on NTFS.
            s if cfg!(windows) && s.contains(':') => {
                return Err(CoreError::UnsafePath(wire_path.to_owned()));
            }
            s => out.push(s),
        }
    }
    Ok(out)
}

/// `C:` style prefix, which Windows resolves outside the destination.
fn has_drive_prefix(path: &str) -> bool {
    matches!(path.as_bytes(), [letter, b':', ..] if letter.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_layout() {
        let frame = encode_file_header("dir/a.txt", 513).unwrap();
        assert_eq!(&frame[..8], &9_u64.to_be_bytes());
        assert_eq!(&frame[8..17], b"dir/a.txt");
        assert_eq!(&frame[17..], &513_u64.to_be_bytes());
    }

    #[test]
    fn chunk_frame_prefix_counts_nonce_and_ciphertext() {
        let chunk = Chunk {
            nonce: [3; NONCE_LEN],
            ciphertext: vec![9; 40],
        };
        let frame = encode_chunk_frame(&chunk);
        assert_eq!(&frame[..8], &52_u64.to_be_bytes());
        assert_eq!(&frame[8..20], &[3; NONCE_LEN]);
        assert_eq!(frame.len(), 8 + 52);
    }

    #[test]
    fn chunk_len_bounds() {
        assert!(check_chunk_len(10, CHUNK_SIZE).is_err());
        assert!(check_chunk_len(max_chunk_body(CHUNK_SIZE) as u64 + 1, CHUNK_SIZE).is_err());
        assert_eq!(
            check_chunk_len(max_chunk_body(CHUNK_SIZE) as u64, CHUNK_SIZE),
            Ok(max_chunk_body(CHUNK_SIZE))
        );
        assert!(check_path_len(0).is_err());
        assert!(check_path_len(MAX_PATH_BYTES as u64 + 1).is_err());
    }

    #[test]
    fn chunk_counts() {
        assert_eq!(data_chunk_count(0), 0);
        assert_eq!(data_chunk_count(1), 1);
        assert_eq!(data_chunk_count(3 * CHUNK_SIZE as u64), 3);
        assert_eq!(data_chunk_count(12_000_000), 3);
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        for bad in ["/etc/passwd", "../x", "a/../../b", "a//b", "C:/x", "a/./b", ""] {
            assert!(safe_relative_path(bad).is_err(), "{bad}");
        }
        assert_eq!(
            safe_relative_path("photos/2024/img.jpg").unwrap(),
            PathBuf::from("photos").join("2024").join("img.jpg")
        );
        assert_eq!(
            safe_relative_path("docs\\a.txt").unwrap(),
            PathBuf::from("docs").join("a.txt")
        );
    }

    #[test]
    fn drive_prefix_is_rejected() {
        for bad in ["C:/x", "c:x", "z:", "D:\\temp\\x"] {
            assert!(safe_relative_path(bad).is_err(), "{bad}");
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn colons_inside_names_are_kept() {
        assert_eq!(
            safe_relative_path("meeting 10:30.txt").unwrap(),
            PathBuf::from("meeting 10:30.txt")
        );
        assert_eq!(
            safe_relative_path("notes/ab:cd/x.md").unwrap(),
            PathBuf::from("notes").join("ab:cd").join("x.md")
        );
    }

    #[test]
    fn host_paths_use_forward_slashes() {
        let path = PathBuf::from("album").join("sub").join("x.png");
        assert_eq!(relative_path_to_wire(&path).unwrap(), "album/sub/x.png");
        assert!(relative_path_to_wire(Path::new("../x")).is_err());
        assert_eq!(wire_path("", "x.png"), "x.png");
        assert_eq!(wire_path("album/x.png", "x.png"), "album/x.png");
    }
}
