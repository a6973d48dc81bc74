//! Dedup index contract and the check → store → record sequence built on top of it.
//!
//! ## Index reqs:
//! - Answer whether a digest was already stored
//! - Record a digest once the chunk behind it has been stored
//! - Be callable from many sessions at once (`Send + Sync`)
//!
//! ## Safe Assumptions:
//! - digests do not collide
//! - a digest is only recorded after its fragments were produced

use std::sync::Arc;

use log::{debug, trace};
use parking_lot::RwLock;

use crate::erasure::Fragment;
use crate::error::{ChunkError, EncodeError};
use crate::hasher::Digest;

pub use locks::{DigestGuard, DigestLocks};
pub use memory::MemoryIndex;

mod locks;
mod memory;

/// The dedup index failed to answer.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct IndexError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl IndexError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Key-existence store keyed by chunk digest. Persistence is up to the implementation.
pub trait DedupIndex: Send + Sync {
    fn contains(&self, digest: &Digest) -> Result<bool, IndexError>;
    fn record(&self, digest: &Digest) -> Result<(), IndexError>;
}

impl<I: DedupIndex + ?Sized> DedupIndex for Arc<I> {
    fn contains(&self, digest: &Digest) -> Result<bool, IndexError> {
        (**self).contains(digest)
    }

    fn record(&self, digest: &Digest) -> Result<(), IndexError> {
        (**self).record(digest)
    }
}

#[derive(Debug)]
pub enum DedupDecision {
    /// First occurrence; the chunk was sealed into these fragments.
    NewChunk { fragments: Vec<Fragment> },
    /// Content already stored, only a reference to the digest is needed.
    DuplicateChunk,
}

impl DedupDecision {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::NewChunk { .. })
    }

    pub fn fragments(&self) -> Option<&[Fragment]> {
        match self {
            Self::NewChunk { fragments } => Some(fragments),
            Self::DuplicateChunk => None,
        }
    }
}

/// An index together with the per-digest locks that make check-then-record atomic.
///
/// Every session writing into the same index must share one `Deduper` (it is cheap to clone).
#[derive(Clone)]
pub struct Deduper {
    index: Arc<dyn DedupIndex>,
    locks: Arc<DigestLocks>,
}

impl Deduper {
    pub fn new(index: impl DedupIndex + 'static) -> Self {
        Self::from_arc(Arc::new(index))
    }

    pub fn from_arc(index: Arc<dyn DedupIndex>) -> Self {
        Self {
            index,
            locks: Arc::new(DigestLocks::default()),
        }
    }

    pub fn index(&self) -> &Arc<dyn DedupIndex> {
        &self.index
    }

    /// Decide whether `digest` is new, running `store` only if it is.
    ///
    /// The digest stays locked from the lookup until the record, so a second chunk with the same
    /// content waits and then sees it as a duplicate. Nothing is recorded if `store` fails.
    pub fn deduplicate(
        &self,
        digest: &Digest,
        store: impl FnOnce() -> Result<Vec<Fragment>, EncodeError>,
    ) -> Result<DedupDecision, ChunkError> {
        self.deduplicate_unless_cancelled(digest, &CancelFlag::default(), store)
    }

    /// Like [`deduplicate`](Self::deduplicate), but nothing is recorded once `cancel` is set.
    ///
    /// The flag is checked right before the record while holding it shared, so after
    /// [`CancelFlag::cancel`] returns no further digest is recorded through it.
    pub fn deduplicate_unless_cancelled(
        &self,
        digest: &Digest,
        cancel: &CancelFlag,
        store: impl FnOnce() -> Result<Vec<Fragment>, EncodeError>,
    ) -> Result<DedupDecision, ChunkError> {
        let _guard = self.locks.lock(*digest);

        if self.index.contains(digest)? {
            trace!("Digest {digest} already stored");
            return Ok(DedupDecision::DuplicateChunk);
        }

        let fragments = store()?;
        let cancelled = cancel.cancelled.read();
        if *cancelled {
            return Err(EncodeError::Cancelled.into());
        }
        self.index.record(digest)?;
        drop(cancelled);
        debug!("Recorded new digest {digest}");
        Ok(DedupDecision::NewChunk { fragments })
    }
}

/// Stops digests from being recorded once set. Shared by the workers of one session.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: RwLock<bool>,
}

impl CancelFlag {
    /// Waits for records already under way, then blocks any later ones.
    pub fn cancel(&self) {
        *self.cancelled.write() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ChunkHasher;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn digest(data: &[u8]) -> Digest {
        ChunkHasher::default().digest(data)
    }

    #[test]
    fn new_then_duplicate() {
        let deduper = Deduper::new(MemoryIndex::new());
        let d = digest(b"a");
        let first = deduper.deduplicate(&d, || Ok(Vec::new())).unwrap();
        assert!(first.is_new());
        let second = deduper
            .deduplicate(&d, || panic!("must not store a duplicate"))
            .unwrap();
        assert!(!second.is_new());
    }

    #[test]
    fn failed_store_is_not_recorded() {
        let index = Arc::new(MemoryIndex::new());
        let deduper = Deduper::from_arc(index.clone());
        let d = digest(b"b");
        let err = deduper
            .deduplicate(&d, || Err(EncodeError::Encrypt("boom".into())))
            .unwrap_err();
        assert!(matches!(err, ChunkError::Encode(_)));
        assert!(!index.contains(&d).unwrap());
        assert!(deduper.deduplicate(&d, || Ok(Vec::new())).unwrap().is_new());
    }

    #[test]
    fn concurrent_same_digest_stored_once() {
        let deduper = Deduper::new(MemoryIndex::new());
        let stored = Arc::new(AtomicUsize::new(0));
        let d = digest(b"contended");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let deduper = deduper.clone();
                let stored = stored.clone();
                thread::spawn(move || {
                    deduper
                        .deduplicate(&d, || {
                            stored.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(5));
                            Ok(Vec::new())
                        })
                        .unwrap()
                        .is_new()
                })
            })
            .collect();
        let new_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&is_new| is_new)
            .count();

        assert_eq!(new_count, 1);
        assert_eq!(stored.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_after_store_is_not_recorded() {
        let index = Arc::new(MemoryIndex::new());
        let deduper = Deduper::from_arc(index.clone());
        let cancel = CancelFlag::default();
        let d = digest(b"late");

        // cancellation lands after the chunk was encoded but before it was recorded
        let err = deduper
            .deduplicate_unless_cancelled(&d, &cancel, || {
                cancel.cancel();
                Ok(Vec::new())
            })
            .unwrap_err();
        assert!(matches!(err, ChunkError::Encode(EncodeError::Cancelled)));
        assert!(index.is_empty());
    }

    /// Index whose `record` waits until the test lets it finish.
    struct HeldRecordIndex {
        inner: MemoryIndex,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DedupIndex for HeldRecordIndex {
        fn contains(&self, digest: &Digest) -> Result<bool, IndexError> {
            self.inner.contains(digest)
        }

        fn record(&self, digest: &Digest) -> Result<(), IndexError> {
            if let Some(entered) = self.entered.lock().take() {
                entered.send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
            self.inner.record(digest)
        }
    }

    #[test]
    fn cancel_waits_for_record_in_progress() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let index = Arc::new(HeldRecordIndex {
            inner: MemoryIndex::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        let deduper = Deduper::from_arc(index.clone());
        let cancel = Arc::new(CancelFlag::default());

        let worker = {
            let deduper = deduper.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                deduper
                    .deduplicate_unless_cancelled(&digest(b"first"), &cancel, || Ok(Vec::new()))
                    .unwrap()
                    .is_new()
            })
        };
        entered_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                cancel.cancel();
                done_tx.send(()).unwrap();
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap());
        done_rx.recv().unwrap();
        canceller.join().unwrap();
        assert!(cancel.is_cancelled());

        let second = digest(b"second");
        let err = deduper
            .deduplicate_unless_cancelled(&second, &cancel, || Ok(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, ChunkError::Encode(EncodeError::Cancelled)));
        assert_eq!(index.inner.len(), 1);
        assert!(!index.contains(&second).unwrap());
    }
}
