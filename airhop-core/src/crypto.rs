use std::io::{self, Read};

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, generic_array::GenericArray},
};
use rand::{Rng, RngCore};
use sha2::{Digest as _, Sha256};

use crate::{CoreError, Digest, Key, NONCE_LEN, SSID_PREFIX};

const PASSWORD_ALPHABET: &[u8] = b"23456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";
const GENERATED_PASSWORD_LEN: usize = 8;

/// One encrypted unit of file content as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Chunk {
    /// Wire body: `nonce || ciphertext`.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_wire(body: &[u8]) -> Result<Self, CoreError> {
        if body.len() < NONCE_LEN {
            return Err(CoreError::TruncatedChunk(body.len()));
        }
        let mut nonce = [0_u8; NONCE_LEN];
        nonce.copy_from_slice(&body[..NONCE_LEN]);
        Ok(Self {
            nonce,
            ciphertext: body[NONCE_LEN..].to_vec(),
        })
    }
}

/// AES-256-GCM bound to a session key. Every chunk gets a fresh random nonce.
#[derive(Clone)]
pub struct ChunkCipher {
    cipher: Aes256Gcm,
}

impl ChunkCipher {
    pub fn new(key: &Key) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key)),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Chunk, CoreError> {
        let mut nonce = [0_u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CoreError::EncryptionFailed)?;
        Ok(Chunk { nonce, ciphertext })
    }

    pub fn decrypt(&self, chunk: &Chunk) -> Result<Vec<u8>, CoreError> {
        self.cipher
            .decrypt(Nonce::from_slice(&chunk.nonce), chunk.ciphertext.as_slice())
            .map_err(|_| CoreError::DecryptionFailed)
    }
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChunkCipher { .. }")
    }
}

pub fn derive_key(password: &str) -> Key {
    Sha256::digest(password.as_bytes()).into()
}

/// Both ends must agree on this when only a password was exchanged.
pub fn ssid_from_key(key: &Key) -> String {
    format!("{SSID_PREFIX}{}", hex::encode(&key[..2]))
}

pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}
