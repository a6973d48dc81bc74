use std::path::Path;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::UsageError;

/// Largest shard count a GF(2^8) Reed-Solomon code can address.
pub const MAX_FRAGMENTS: usize = 256;

#[derive(Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

#[derive(Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum CipherAlgorithm {
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

/// Parameters for one ingest session.
///
/// Every session gets its own copy, so sessions with different parameters can run side by side.
/// Key material is not part of the config and is handed to the cipher directly.
#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Bytes covered by the rolling hash window.
    pub window_size: usize,
    pub min_chunk_size: usize,
    /// Expected chunk length; the fingerprint mask width is derived from it.
    pub target_chunk_size: usize,
    pub max_chunk_size: usize,
    pub hash_algorithm: HashAlgorithm,
    /// Fragments required to reconstruct a chunk.
    pub erasure_k: usize,
    /// Fragments produced per chunk.
    pub erasure_n: usize,
    pub cipher_algorithm: CipherAlgorithm,
    /// Chunks allowed to be hashed/encoded at once by a concurrent session.
    pub max_in_flight: usize,
    /// Consecutive index failures after which the session gives up.
    pub max_consecutive_index_errors: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            window_size: 48,
            min_chunk_size: 2 * 1024,
            target_chunk_size: 8 * 1024,
            max_chunk_size: 64 * 1024,
            hash_algorithm: HashAlgorithm::default(),
            erasure_k: 4,
            erasure_n: 6,
            cipher_algorithm: CipherAlgorithm::default(),
            max_in_flight: 8,
            max_consecutive_index_errors: 3,
        }
    }
}

impl IngestConfig {
    pub fn from_toml_str(config_str: &str) -> Result<Self, UsageError> {
        let config: Self = toml::from_str(config_str)
            .map_err(|e| UsageError::InvalidConfig(format!("unable to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, UsageError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            UsageError::InvalidConfig(format!("unable to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&config_str)
    }

    pub fn validate(&self) -> Result<(), UsageError> {
        let invalid = |msg: &str| Err(UsageError::InvalidConfig(msg.to_owned()));

        if self.window_size == 0 {
            return invalid("window_size must be non-zero");
        }
        if self.min_chunk_size == 0 || self.target_chunk_size == 0 || self.max_chunk_size == 0 {
            return invalid("chunk sizes must be non-zero");
        }
        if self.min_chunk_size > self.target_chunk_size {
            return invalid("min_chunk_size cannot be greater than target_chunk_size");
        }
        if self.target_chunk_size > self.max_chunk_size {
            return invalid("target_chunk_size cannot be greater than max_chunk_size");
        }
        if self.window_size > self.max_chunk_size {
            return invalid("window_size cannot be greater than max_chunk_size");
        }
        if self.erasure_k == 0 {
            return invalid("erasure_k must be non-zero");
        }
        if self.erasure_k > self.erasure_n {
            return invalid("erasure_k cannot be greater than erasure_n");
        }
        if self.erasure_n > MAX_FRAGMENTS {
            return invalid("erasure_n cannot exceed 256 fragments");
        }
        if self.max_in_flight == 0 {
            return invalid("max_in_flight must be non-zero");
        }
        if self.max_in_flight > Semaphore::MAX_PERMITS {
            return invalid("max_in_flight exceeds the number of permits a semaphore can hold");
        }
        if self.max_consecutive_index_errors == 0 {
            return invalid("max_consecutive_index_errors must be non-zero");
        }
        Ok(())
    }
}
