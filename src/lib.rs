//! Streaming ingest of byte streams into deduplicated, encrypted, erasure-coded chunks.
//!
//! Bytes pushed into an [`IngestSession`] are split at content-defined boundaries, each chunk is
//! identified by its digest, and only chunks the [`DedupIndex`] has not seen are encrypted and
//! erasure-coded into fragments. Results come back one per chunk, in stream order.

pub mod chunker;
pub mod config;
pub mod db;
pub mod encoder;
pub mod encryptor;
pub mod erasure;
pub mod error;
pub mod hasher;
pub mod session;

#[cfg(test)]
mod test_util;

pub use config::{CipherAlgorithm, HashAlgorithm, IngestConfig};
pub use db::{CancelFlag, DedupDecision, DedupIndex, Deduper, IndexError, MemoryIndex};
pub use encoder::{ChunkEncoder, EncodePipeline};
pub use encryptor::KeyMaterial;
pub use erasure::{Fragment, FragmentKind};
pub use error::{ChunkError, EncodeError, SessionError, UsageError};
pub use hasher::{ChunkHasher, Digest};
pub use session::{ingest_reader, ChunkResult, ConcurrentSession, IngestSession, SessionState};
