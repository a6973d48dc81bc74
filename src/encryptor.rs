use std::fmt::{Debug, Formatter};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::config::CipherAlgorithm;
use crate::error::{EncodeError, UsageError};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncodeError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncodeError>;
}

/// Secret key handed to the cipher. Never printed.
#[derive(Clone, Eq, PartialEq)]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        Self(XChaCha20Poly1305::generate_key(&mut OsRng).into())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, UsageError> {
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(hex_key.trim(), &mut bytes).map_err(|e| {
            UsageError::InvalidConfig(format!("key must be {} hex characters: {e}", KEY_SIZE * 2))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Debug for KeyMaterial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

pub fn cipher_for(algorithm: CipherAlgorithm, key: &KeyMaterial) -> Box<dyn Cipher> {
    match algorithm {
        CipherAlgorithm::XChaCha20Poly1305 => Box::new(XChaCha20Cipher::new(key)),
    }
}

/// XChaCha20-Poly1305 with a random nonce per message.
///
/// Output layout is `nonce (24) || ciphertext || tag (16)`.
pub struct XChaCha20Cipher {
    cipher: XChaCha20Poly1305,
}

impl XChaCha20Cipher {
    pub fn new(key: &KeyMaterial) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }
}

impl Cipher for XChaCha20Cipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EncodeError::Encrypt(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncodeError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncodeError::Decrypt(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| EncodeError::Decrypt("authentication tag mismatch".to_owned()))
    }
}
