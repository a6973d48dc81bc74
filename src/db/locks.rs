use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::hasher::Digest;

/// Mutual exclusion keyed by digest.
///
/// Entries only live while someone holds or waits for them, so the map stays as small as the
/// number of chunks currently being decided.
#[derive(Default)]
pub struct DigestLocks {
    locks: Mutex<HashMap<Digest, Arc<Mutex<()>>>>,
}

impl DigestLocks {
    /// Block until no one else holds `digest`.
    pub fn lock(&self, digest: Digest) -> DigestGuard<'_> {
        let lock = self.locks.lock().entry(digest).or_default().clone();
        DigestGuard {
            owner: self,
            digest,
            guard: Some(lock.lock_arc()),
        }
    }

    /// Number of digests currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct DigestGuard<'a> {
    owner: &'a DigestLocks,
    digest: Digest,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for DigestGuard<'_> {
    fn drop(&mut self) {
        // release first so the count below only sees waiters
        drop(self.guard.take());
        let mut locks = self.owner.locks.lock();
        if locks
            .get(&self.digest)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.digest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ChunkHasher;

    #[test]
    fn entries_are_cleaned_up() {
        let locks = DigestLocks::default();
        let a = ChunkHasher::default().digest(b"a");
        let b = ChunkHasher::default().digest(b"b");
        {
            let _ga = locks.lock(a);
            let _gb = locks.lock(b);
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn same_digest_is_exclusive() {
        let locks = Arc::new(DigestLocks::default());
        let d = ChunkHasher::default().digest(b"x");
        let guard = locks.lock(d);

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = {
            let locks = locks.clone();
            std::thread::spawn(move || {
                let _g = locks.lock(d);
                tx.send(()).unwrap();
            })
        };
        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(50))
            .is_err());
        drop(guard);
        rx.recv().unwrap();
        handle.join().unwrap();
        assert!(locks.is_empty());
    }
}
