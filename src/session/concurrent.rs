use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use log::{error, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{JoinError, JoinSet};

use crate::config::IngestConfig;
use crate::db::Deduper;
use crate::encoder::ChunkEncoder;
use crate::error::{SessionError, UsageError};
use crate::hasher::ChunkHasher;
use crate::session::processor::{ChunkProcessor, IndexErrorCounter};
use crate::session::reorder::ReorderBuffer;
use crate::session::{check_open, ChunkResult, SessionState, SplitChunk, StreamSplitter};

/// A finished chunk and the permit it keeps until released in order.
type Completion = (u64, ChunkResult, OwnedSemaphorePermit);

/// Reason a call has to fail the session.
enum Stop {
    Index(usize),
    Invariant(String),
}

/// Session that hashes, looks up and encodes several chunks of its stream at once.
///
/// Boundary detection still happens on the caller's task, in order. Each chunk then goes to the
/// blocking pool and results are handed back strictly in stream order. A chunk holds one of
/// `max_in_flight` permits from dispatch until its result is released, so a slow chunk stalls
/// dispatch instead of letting finished results pile up behind it. A `push` returns whatever is
/// ready; `flush` waits for everything.
///
/// The index escalation policy is evaluated over results in stream order, same as
/// [`IngestSession`](crate::session::IngestSession). Chunks already in flight when the session
/// fails are cancelled if they have not recorded yet, and their results are still returned.
pub struct ConcurrentSession {
    pub(super) splitter: StreamSplitter,
    processor: Arc<ChunkProcessor>,
    index_errors: IndexErrorCounter,
    state: SessionState,
    permits: Arc<Semaphore>,
    tasks: JoinSet<Completion>,
    reorder: ReorderBuffer<(ChunkResult, OwnedSemaphorePermit)>,
    next_seq: u64,
}

impl ConcurrentSession {
    pub fn open(
        config: &IngestConfig,
        deduper: Deduper,
        encoder: Arc<dyn ChunkEncoder>,
    ) -> Result<Self, UsageError> {
        config.validate()?;
        Ok(Self {
            splitter: StreamSplitter::new(config),
            processor: Arc::new(ChunkProcessor::new(
                ChunkHasher::new(config.hash_algorithm),
                deduper,
                encoder,
            )),
            index_errors: IndexErrorCounter::new(config.max_consecutive_index_errors),
            state: SessionState::Idle,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            tasks: JoinSet::new(),
            reorder: ReorderBuffer::new(),
            next_seq: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Chunks dispatched but not yet returned to the caller.
    pub fn in_flight(&self) -> usize {
        self.tasks.len() + self.reorder.len()
    }

    pub async fn push(&mut self, data: &[u8]) -> Result<Vec<ChunkResult>, SessionError> {
        check_open(self.state)?;
        self.state = SessionState::Accumulating;
        self.splitter.append(data);

        let mut emitted = Vec::new();
        while let Some(chunk) = self.splitter.next_chunk() {
            self.state = SessionState::Emitting;
            if let Err(stop) = self.dispatch(chunk, &mut emitted).await {
                return Err(self.fail(stop, emitted).await);
            }
            if let Err(stop) = self.collect_finished(&mut emitted) {
                return Err(self.fail(stop, emitted).await);
            }
        }
        self.state = SessionState::Accumulating;
        Ok(emitted)
    }

    /// Dispatch the residual as the final chunk, wait for all outstanding work, and close.
    pub async fn flush(&mut self) -> Result<Vec<ChunkResult>, SessionError> {
        check_open(self.state)?;
        self.state = SessionState::Flushing;

        let mut emitted = Vec::new();
        if let Some(chunk) = self.splitter.finish() {
            if let Err(stop) = self.dispatch(chunk, &mut emitted).await {
                return Err(self.fail(stop, emitted).await);
            }
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(stop) = self.accept(joined, &mut emitted) {
                return Err(self.fail(stop, emitted).await);
            }
        }
        self.state = SessionState::Closed;
        Ok(emitted)
    }

    /// End the session. Unflushed bytes and unreturned results are dropped.
    pub fn close(&mut self) {
        let dropped = self.splitter.discard();
        if dropped > 0 || self.in_flight() > 0 {
            warn!(
                "Closing session with {dropped} unflushed bytes and {} chunks in flight",
                self.in_flight()
            );
            self.stop_workers();
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    /// Stop immediately. In-flight chunks that have not been recorded yet never will be.
    pub fn abort(&mut self) {
        self.splitter.discard();
        self.stop_workers();
        self.state = SessionState::Closed;
    }

    fn stop_workers(&mut self) {
        self.processor.cancel();
        // blocking tasks that already started run to completion, the flag keeps them from
        // recording
        self.tasks.abort_all();
        self.reorder.drain_pending();
    }

    async fn dispatch(
        &mut self,
        chunk: SplitChunk,
        emitted: &mut Vec<ChunkResult>,
    ) -> Result<(), Stop> {
        let (offset, data): (u64, Bytes) = chunk.map_err(Stop::Invariant)?;
        let permit = self.acquire(emitted).await?;

        let seq = self.next_seq;
        self.next_seq += 1;
        trace!("Dispatching chunk #{seq} @{offset} ({} bytes)", data.len());

        let processor = self.processor.clone();
        self.tasks.spawn_blocking(move || (seq, processor.process(offset, data), permit));
        Ok(())
    }

    /// Wait for a free permit. Permits only come back when results are released, so completions
    /// are taken in while waiting.
    async fn acquire(
        &mut self,
        emitted: &mut Vec<ChunkResult>,
    ) -> Result<OwnedSemaphorePermit, Stop> {
        loop {
            match self.permits.clone().try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::NoPermits) => match self.tasks.join_next().await {
                    Some(joined) => self.accept(joined, emitted)?,
                    None => {
                        return Err(Stop::Invariant(format!(
                            "no permit free with nothing running ({} results held)",
                            self.reorder.len()
                        )));
                    }
                },
                Err(TryAcquireError::Closed) => {
                    return Err(Stop::Invariant("worker permits closed".to_owned()));
                }
            }
        }
    }

    fn collect_finished(&mut self, emitted: &mut Vec<ChunkResult>) -> Result<(), Stop> {
        while let Some(joined) = self.tasks.try_join_next() {
            self.accept(joined, emitted)?;
        }
        Ok(())
    }

    /// Take one completion and release everything now in order.
    fn accept(
        &mut self,
        joined: Result<Completion, JoinError>,
        emitted: &mut Vec<ChunkResult>,
    ) -> Result<(), Stop> {
        let (seq, result, permit) =
            joined.map_err(|e| Stop::Invariant(format!("chunk worker did not finish: {e}")))?;
        self.reorder.insert(seq, (result, permit));

        while let Some((result, permit)) = self.reorder.pop_ready() {
            drop(permit);
            let escalate = self.index_errors.observe(&result);
            emitted.push(result);
            if let Some(consecutive) = escalate {
                return Err(Stop::Index(consecutive));
            }
        }
        Ok(())
    }

    async fn fail(&mut self, stop: Stop, mut emitted: Vec<ChunkResult>) -> SessionError {
        self.processor.cancel();
        self.splitter.discard();
        self.state = SessionState::Failed;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((seq, result, permit)) => self.reorder.insert(seq, (result, permit)),
                Err(e) => warn!("Chunk worker lost while failing session: {e}"),
            }
        }
        emitted.extend(self.reorder.drain_pending().into_iter().map(|(result, _)| result));

        match stop {
            Stop::Index(consecutive) => {
                error!("Dedup index failed {consecutive} times in a row, failing session");
                SessionError::IndexUnavailable {
                    consecutive,
                    emitted,
                }
            }
            Stop::Invariant(detail) => {
                error!("Invariant violated, failing session: {detail}");
                SessionError::InvariantViolation { detail, emitted }
            }
        }
    }
}

/// Drive `reader` to its end through `session`, yielding results as they become ready.
///
/// The session is flushed once the reader is exhausted. A fatal session error ends the stream;
/// the results it carries are reachable through [`SessionError::into_emitted`].
pub fn ingest_reader<R>(
    mut session: ConcurrentSession,
    mut reader: R,
    read_size: usize,
) -> impl Stream<Item = Result<ChunkResult, SessionError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async_stream::try_stream! {
        let mut buf = vec![0u8; read_size.max(1)];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            for result in session.push(&buf[..read]).await? {
                yield result;
            }
        }
        for result in session.flush().await? {
            yield result;
        }
    }
}
