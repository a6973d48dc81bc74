//! Content-defined chunk boundary detection.
//!
//! A boundary is declared after the current byte when either
//!
//! 1. the chunk has reached `max_size` (checked first, so a forced cut always wins), or
//! 2. the chunk is at least `min_size` long and the low `log2(target_size)` bits of the rolling
//!    fingerprint are all set.
//!
//! The rolling window is reset at every boundary, so where a chunk ends depends only on the bytes
//! of that chunk. Bytes further than one window before the `min_size` position can never reach a
//! checked fingerprint, so they are counted but not rolled.

pub use rabin::RollingHasher;

use crate::config::IngestConfig;

pub mod rabin;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BoundaryDecision {
    Continue,
    BoundaryHere,
}

#[derive(Debug, Clone)]
pub struct ChunkBoundaryDetector {
    hasher: RollingHasher,
    min_size: usize,
    max_size: usize,
    mask: u32,
    /// Bytes of the current chunk fed so far.
    len: usize,
    /// Chunk length up to which bytes are only counted.
    roll_from: usize,
}

impl ChunkBoundaryDetector {
    pub fn new(window_size: usize, min_size: usize, target_size: usize, max_size: usize) -> Self {
        assert!(min_size > 0, "Minimum chunk size must be non-zero");
        assert!(
            min_size <= target_size && target_size <= max_size,
            "Chunk sizes must satisfy min <= target <= max"
        );

        let bits = logarithm2(target_size as u64).clamp(1, 31);
        Self {
            hasher: RollingHasher::new(window_size),
            min_size,
            max_size,
            mask: rabin::MASKS[bits as usize],
            len: 0,
            roll_from: min_size.saturating_sub(window_size),
        }
    }

    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self::new(
            cfg.window_size,
            cfg.min_chunk_size,
            cfg.target_chunk_size,
            cfg.max_chunk_size,
        )
    }

    #[inline]
    pub fn feed(&mut self, byte: u8) -> BoundaryDecision {
        self.len += 1;
        let fingerprint = if self.len > self.roll_from {
            self.hasher.roll(byte)
        } else {
            self.hasher.fingerprint()
        };

        if self.len >= self.max_size
            || (self.len >= self.min_size && fingerprint & self.mask == self.mask)
        {
            self.finish();
            return BoundaryDecision::BoundaryHere;
        }
        BoundaryDecision::Continue
    }

    /// Feed bytes until a boundary is found, returning how many bytes of `data` belong to the
    /// chunk that just ended. Returns `None` when all of `data` was consumed without a boundary.
    ///
    /// Produces exactly the boundaries repeated calls to [`feed`](Self::feed) would.
    pub fn scan(&mut self, data: &[u8]) -> Option<usize> {
        let mut consumed = 0;
        if self.len < self.roll_from {
            consumed = (self.roll_from - self.len).min(data.len());
            self.len += consumed;
        }

        for &byte in &data[consumed..] {
            consumed += 1;
            if self.feed(byte) == BoundaryDecision::BoundaryHere {
                return Some(consumed);
            }
        }
        None
    }

    /// Length of the chunk currently being accumulated.
    pub fn pending_len(&self) -> usize {
        self.len
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Forget the current chunk and start a fresh window.
    pub fn finish(&mut self) {
        self.len = 0;
        self.hasher.reset();
    }
}

/// Rounded base-2 logarithm function for unsigned 64-bit integers.
fn logarithm2(value: u64) -> u32 {
    (value as f64).log2().round() as u32
}
