use std::collections::HashSet;

use parking_lot::RwLock;

use crate::db::{DedupIndex, IndexError};
use crate::hasher::Digest;

/// Index kept entirely in memory. Lost on drop; useful for one-off runs and tests.
#[derive(Default, Debug)]
pub struct MemoryIndex {
    digests: RwLock<HashSet<Digest>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.digests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.read().is_empty()
    }
}

impl DedupIndex for MemoryIndex {
    fn contains(&self, digest: &Digest) -> Result<bool, IndexError> {
        Ok(self.digests.read().contains(digest))
    }

    fn record(&self, digest: &Digest) -> Result<(), IndexError> {
        self.digests.write().insert(*digest);
        Ok(())
    }
}
