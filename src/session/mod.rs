//! Ingest sessions: the state machine that turns pushed bytes into ordered chunk results.
//!
//! A session owns the boundary detector and the residual bytes of one stream. Every complete
//! chunk is hashed, checked against the dedup index and, only when new, encoded. Results come
//! back in stream order, one per chunk.
//!
//! [`IngestSession`] does the per-chunk work inline on the caller's thread.
//! [`ConcurrentSession`] runs it on tokio's blocking pool and reorders completions.
//!
//! ## Index failures
//! An index error only fails its own chunk. Once `max_consecutive_index_errors` chunks in a
//! row (in stream order) fail on the index, the session gives up: it discards its residual,
//! enters [`SessionState::Failed`] and the call returns [`SessionError::IndexUnavailable`]
//! holding every result the call produced. A chunk whose index interaction succeeds resets the
//! streak; encode errors leave it untouched.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{error, trace, warn};

use crate::chunker::ChunkBoundaryDetector;
use crate::config::IngestConfig;
use crate::db::{DedupDecision, Deduper};
use crate::encoder::ChunkEncoder;
use crate::error::{ChunkError, SessionError, UsageError};
use crate::hasher::{ChunkHasher, Digest};

pub use concurrent::{ingest_reader, ConcurrentSession};
pub use reorder::ReorderBuffer;

use processor::{ChunkProcessor, IndexErrorCounter};

mod concurrent;
mod processor;
mod reorder;

/// Outcome for one chunk of the stream.
#[derive(Debug)]
pub struct ChunkResult {
    /// Position of the first byte of the chunk in the stream.
    pub offset: u64,
    pub length: usize,
    pub digest: Digest,
    pub outcome: Result<DedupDecision, ChunkError>,
}

impl ChunkResult {
    pub fn is_new(&self) -> bool {
        matches!(&self.outcome, Ok(decision) if decision.is_new())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(&self.outcome, Ok(DedupDecision::DuplicateChunk))
    }

    /// Offset one past the last byte of the chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Accumulating,
    Emitting,
    Flushing,
    Closed,
    Failed,
}

/// Residual buffer plus boundary detection, yielding chunks with their stream offsets.
struct StreamSplitter {
    detector: ChunkBoundaryDetector,
    residual: BytesMut,
    /// Prefix of `residual` the detector has already seen.
    scanned: usize,
    /// Stream offset of `residual[0]`.
    offset: u64,
}

type SplitChunk = Result<(u64, Bytes), String>;

impl StreamSplitter {
    fn new(config: &IngestConfig) -> Self {
        Self {
            detector: ChunkBoundaryDetector::from_config(config),
            residual: BytesMut::with_capacity(config.max_chunk_size),
            scanned: 0,
            offset: 0,
        }
    }

    fn append(&mut self, data: &[u8]) {
        self.residual.extend_from_slice(data);
    }

    /// Cut the next complete chunk off the residual, or `None` once the remaining bytes hold no
    /// boundary. An `Err` means the detector produced a chunk it should not have.
    fn next_chunk(&mut self) -> Option<SplitChunk> {
        let Some(consumed) = self.detector.scan(&self.residual[self.scanned..]) else {
            self.scanned = self.residual.len();
            return None;
        };

        let len = self.scanned + consumed;
        self.scanned = 0;
        let offset = self.offset;
        self.offset += len as u64;
        let chunk = self.residual.split_to(len).freeze();
        trace!("Boundary at {} ({len} byte chunk)", self.offset);

        let (min, max) = (self.detector.min_size(), self.detector.max_size());
        if len < min || len > max {
            return Some(Err(format!(
                "chunk at {offset} is {len} bytes, outside [{min}, {max}]"
            )));
        }
        Some(Ok((offset, chunk)))
    }

    /// Whatever is left becomes the final chunk, however short.
    fn finish(&mut self) -> Option<SplitChunk> {
        self.detector.finish();
        self.scanned = 0;
        if self.residual.is_empty() {
            return None;
        }

        let len = self.residual.len();
        let offset = self.offset;
        self.offset += len as u64;
        let chunk = self.residual.split().freeze();
        trace!("Final boundary at {} ({len} byte chunk)", self.offset);

        if len > self.detector.max_size() {
            return Some(Err(format!(
                "final chunk at {offset} is {len} bytes, over the {} maximum",
                self.detector.max_size()
            )));
        }
        Some(Ok((offset, chunk)))
    }

    /// Drop the residual. Returns how many bytes were thrown away.
    fn discard(&mut self) -> usize {
        let dropped = self.residual.len();
        self.residual.clear();
        self.scanned = 0;
        self.detector.finish();
        dropped
    }

    fn pending_len(&self) -> usize {
        self.residual.len()
    }
}

fn check_open(state: SessionState) -> Result<(), UsageError> {
    match state {
        SessionState::Closed => Err(UsageError::SessionClosed),
        SessionState::Failed => Err(UsageError::SessionFailed),
        _ => Ok(()),
    }
}

/// Synchronous session: every chunk is hashed, looked up and encoded before `push` returns.
///
/// `push` and `flush` take `&mut self`, so calls on one session are serialized by the borrow
/// checker. Independent sessions may run on different threads against one shared [`Deduper`].
pub struct IngestSession {
    splitter: StreamSplitter,
    processor: ChunkProcessor,
    index_errors: IndexErrorCounter,
    state: SessionState,
}

impl IngestSession {
    pub fn open(
        config: &IngestConfig,
        deduper: Deduper,
        encoder: Arc<dyn ChunkEncoder>,
    ) -> Result<Self, UsageError> {
        config.validate()?;
        Ok(Self {
            splitter: StreamSplitter::new(config),
            processor: ChunkProcessor::new(
                ChunkHasher::new(config.hash_algorithm),
                deduper,
                encoder,
            ),
            index_errors: IndexErrorCounter::new(config.max_consecutive_index_errors),
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bytes pushed but not yet part of an emitted chunk.
    pub fn pending_len(&self) -> usize {
        self.splitter.pending_len()
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Vec<ChunkResult>, SessionError> {
        check_open(self.state)?;
        self.state = SessionState::Accumulating;
        self.splitter.append(data);

        let mut emitted = Vec::new();
        while let Some(chunk) = self.splitter.next_chunk() {
            self.state = SessionState::Emitting;
            self.emit(chunk, &mut emitted)?;
        }
        self.state = SessionState::Accumulating;
        Ok(emitted)
    }

    /// Emit the residual as the final chunk and close the session.
    pub fn flush(&mut self) -> Result<Vec<ChunkResult>, SessionError> {
        check_open(self.state)?;
        self.state = SessionState::Flushing;

        let mut emitted = Vec::new();
        if let Some(chunk) = self.splitter.finish() {
            self.emit(chunk, &mut emitted)?;
        }
        self.state = SessionState::Closed;
        Ok(emitted)
    }

    /// End the session. Bytes not yet flushed are dropped.
    pub fn close(&mut self) {
        let dropped = self.splitter.discard();
        if dropped > 0 {
            warn!("Closing session with {dropped} unflushed bytes");
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    /// Stop immediately, discarding the residual without touching the index.
    pub fn abort(&mut self) {
        self.processor.cancel();
        self.splitter.discard();
        self.state = SessionState::Closed;
    }

    fn emit(
        &mut self,
        chunk: SplitChunk,
        emitted: &mut Vec<ChunkResult>,
    ) -> Result<(), SessionError> {
        let (offset, data) = match chunk {
            Ok(chunk) => chunk,
            Err(detail) => {
                error!("Invariant violated, failing session: {detail}");
                self.fail();
                return Err(SessionError::InvariantViolation {
                    detail,
                    emitted: std::mem::take(emitted),
                });
            }
        };

        let result = self.processor.process(offset, data);
        let escalate = self.index_errors.observe(&result);
        emitted.push(result);

        if let Some(consecutive) = escalate {
            error!("Dedup index failed {consecutive} times in a row, failing session");
            self.fail();
            return Err(SessionError::IndexUnavailable {
                consecutive,
                emitted: std::mem::take(emitted),
            });
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.splitter.discard();
        self.state = SessionState::Failed;
    }
}
