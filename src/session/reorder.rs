use std::collections::BTreeMap;

/// Holds results that finished early until everything before them has been released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the completion of item `seq`. Each sequence number may be inserted once.
    pub fn insert(&mut self, seq: u64, item: T) {
        debug_assert!(seq >= self.next, "sequence {seq} was already released");
        let prev = self.pending.insert(seq, item);
        debug_assert!(prev.is_none(), "sequence {seq} inserted twice");
    }

    /// Next item in order, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// Every item that can be released now, in order.
    pub fn drain_ready(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.pop_ready()).collect()
    }

    /// Sequence number that will be released next.
    pub fn next_seq(&self) -> u64 {
        self.next
    }

    /// Items waiting on an earlier one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take everything still held, in sequence order, regardless of gaps.
    pub fn drain_pending(&mut self) -> Vec<T> {
        let pending = std::mem::take(&mut self.pending);
        if let Some(&last) = pending.keys().next_back() {
            self.next = last + 1;
        }
        pending.into_values().collect()
    }
}
