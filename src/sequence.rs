//! Id sequences for content and global ids

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of strictly increasing ids, shared across threads
pub trait IdSequence: Send + Sync + fmt::Debug {
    /// Next id; never returns the same value twice
    fn next(&self) -> i64;

    /// Last id handed out (0 before the first call)
    fn current(&self) -> i64;
}

/// In-memory sequence backed by an atomic counter
#[derive(Debug, Default)]
pub struct AtomicSequence {
    last: AtomicI64,
}

impl AtomicSequence {
    /// Sequence whose first id is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence resuming after `last`, e.g. the highest persisted id
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }
}

impl IdSequence for AtomicSequence {
    fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_one_and_resumes() {
        let seq = AtomicSequence::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.current(), 2);
        assert_eq!(AtomicSequence::starting_after(41).next(), 42);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let seq = Arc::new(AtomicSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || (0..100).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();
        let ids: HashSet<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 800);
        assert_eq!(seq.current(), 800);
    }
}
