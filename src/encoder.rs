use crate::config::IngestConfig;
use crate::encryptor::{cipher_for, Cipher, KeyMaterial};
use crate::erasure::{self, ErasureCoder, Fragment, ReedSolomonCoder};
use crate::error::{EncodeError, UsageError};

/// Second stage of the pipeline, only run for chunks the index has not seen.
pub trait ChunkEncoder: Send + Sync {
    fn encode(&self, chunk: &[u8]) -> Result<Vec<Fragment>, EncodeError>;
}

/// Encrypt, then erasure-code the ciphertext.
pub struct EncodePipeline {
    cipher: Box<dyn Cipher>,
    coder: Box<dyn ErasureCoder>,
}

impl EncodePipeline {
    pub fn new(cipher: Box<dyn Cipher>, coder: Box<dyn ErasureCoder>) -> Self {
        Self { cipher, coder }
    }

    pub fn from_config(cfg: &IngestConfig, key: &KeyMaterial) -> Result<Self, UsageError> {
        cfg.validate()?;
        Ok(Self::new(
            cipher_for(cfg.cipher_algorithm, key),
            Box::new(ReedSolomonCoder::new(cfg.erasure_k, cfg.erasure_n)?),
        ))
    }

    pub fn data_fragments(&self) -> usize {
        self.coder.data_fragments()
    }

    pub fn total_fragments(&self) -> usize {
        self.coder.total_fragments()
    }

    pub fn is_recoverable(&self, fragments: &[Fragment]) -> bool {
        erasure::is_recoverable(fragments, self.coder.data_fragments())
    }

    /// Inverse of [`encode`](ChunkEncoder::encode): rebuild the ciphertext from any `K` fragments
    /// and decrypt it.
    pub fn decode(&self, fragments: &[Fragment]) -> Result<Vec<u8>, EncodeError> {
        let ciphertext = self.coder.reconstruct(fragments)?;
        self.cipher.decrypt(&ciphertext)
    }
}

impl ChunkEncoder for EncodePipeline {
    fn encode(&self, chunk: &[u8]) -> Result<Vec<Fragment>, EncodeError> {
        let ciphertext = self.cipher.encrypt(chunk)?;
        self.coder.encode(&ciphertext)
    }
}
