use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::db::{CancelFlag, Deduper};
use crate::encoder::ChunkEncoder;
use crate::error::{ChunkError, EncodeError};
use crate::hasher::ChunkHasher;
use crate::session::ChunkResult;

/// Hash → dedup decision → (conditional) encode for one chunk at a time.
///
/// Holds no per-chunk state, so one processor is shared by every worker of a session.
pub(crate) struct ChunkProcessor {
    hasher: ChunkHasher,
    deduper: Deduper,
    encoder: Arc<dyn ChunkEncoder>,
    cancelled: CancelFlag,
}

impl ChunkProcessor {
    pub fn new(hasher: ChunkHasher, deduper: Deduper, encoder: Arc<dyn ChunkEncoder>) -> Self {
        Self {
            hasher,
            deduper,
            encoder,
            cancelled: CancelFlag::default(),
        }
    }

    /// Stop any chunk that has not yet been recorded from being recorded.
    ///
    /// Returns once every record already under way has finished.
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    pub fn process(&self, offset: u64, chunk: Bytes) -> ChunkResult {
        let digest = self.hasher.digest(&chunk);
        let outcome = self
            .deduper
            .deduplicate_unless_cancelled(&digest, &self.cancelled, || {
                // skip the encode, the record would be refused anyway
                if self.is_cancelled() {
                    return Err(EncodeError::Cancelled);
                }
                self.encoder.encode(&chunk)
            });

        match &outcome {
            Ok(decision) if decision.is_new() => {
                debug!("Chunk @{offset} ({} bytes) is new: {digest}", chunk.len())
            }
            Ok(_) => debug!("Chunk @{offset} ({} bytes) is a duplicate: {digest}", chunk.len()),
            Err(ChunkError::Encode(EncodeError::Cancelled)) => {
                debug!("Chunk @{offset} cancelled before it was recorded")
            }
            Err(e) => warn!("Chunk @{offset} ({} bytes) failed: {e}", chunk.len()),
        }

        ChunkResult {
            offset,
            length: chunk.len(),
            digest,
            outcome,
        }
    }
}

/// Counts index failures over consecutive chunks, in stream order.
#[derive(Debug)]
pub(crate) struct IndexErrorCounter {
    consecutive: usize,
    limit: usize,
}

impl IndexErrorCounter {
    pub fn new(limit: usize) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Account for one emitted result. Returns the streak length once it reaches the limit.
    pub fn observe(&mut self, result: &ChunkResult) -> Option<usize> {
        match &result.outcome {
            Ok(_) => self.consecutive = 0,
            Err(e) if e.is_index() => {
                self.consecutive += 1;
                if self.consecutive >= self.limit {
                    return Some(self.consecutive);
                }
            }
            Err(_) => {}
        }
        None
    }
}
