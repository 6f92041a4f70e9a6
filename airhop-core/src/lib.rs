pub mod credentials;
pub mod crypto;
pub mod platform;
pub mod wire;

use thiserror::Error;

pub use credentials::{Credentials, OobPayload};
pub use crypto::{Chunk, ChunkCipher, derive_key, generate_password, sha256_reader, ssid_from_key};
pub use platform::{Platform, PlatformCapability, Role, TransferMode, capability, resolve_role};

pub const PROTOCOL_VERSION: u64 = 8;
pub const DEFAULT_PORT: u16 = 3290;
pub const CHUNK_SIZE: usize = 5_000_000;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const HASH_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PATH_BYTES: usize = 4096;
pub const SSID_PREFIX: &str = "airhop_";

pub type Key = [u8; KEY_LEN];
pub type Digest = [u8; HASH_LEN];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("password must be at least {min} characters, got {len}")]
    PasswordTooShort { len: usize, min: usize },
    #[error("ssid must not be empty")]
    EmptySsid,
    #[error("credential payload is malformed: {0}")]
    MalformedPayload(String),
    #[error("invalid frame length {0}")]
    InvalidFrameLength(u64),
    #[error("file path is not valid utf-8")]
    InvalidPathEncoding,
    #[error("refusing unsafe relative path {0:?}")]
    UnsafePath(String),
    #[error("chunk shorter than nonce ({0} bytes)")]
    TruncatedChunk(usize),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("no hosting role resolves for local {local} and peer {peer} in {mode} mode")]
    UnresolvedRole {
        local: Platform,
        peer: Platform,
        mode: TransferMode,
    },
    #[error("unknown platform identifier {0:?}")]
    UnknownPlatform(String),
}
