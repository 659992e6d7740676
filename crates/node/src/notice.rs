//! Duplicate filtering for incoming block notices.

use meridian_types::Hash;
use std::collections::{HashSet, VecDeque};

/// Bounded seen-set for gossip block notices.
///
/// A block announced by many peers should hit the chain service once; later
/// announcements of the same hash are dropped here, before any request is
/// made.
#[derive(Debug)]
pub struct BlockNoticeCache {
    capacity: usize,
    seen: HashSet<Hash>,
    order: VecDeque<Hash>,
}

impl BlockNoticeCache {
    /// A cache remembering up to `capacity` hashes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `hash`; returns `true` when it was already known.
    pub fn contains_or_add(&mut self, hash: Hash) -> bool {
        if self.seen.contains(&hash) {
            return true;
        }
        if self.seen.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(hash);
        self.order.push_back(hash);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_notice_is_a_duplicate() {
        let mut cache = BlockNoticeCache::new(8);
        let h = Hash::digest(b"block");
        assert!(!cache.contains_or_add(h));
        assert!(cache.contains_or_add(h));
    }

    #[test]
    fn test_eviction_forgets_oldest() {
        let mut cache = BlockNoticeCache::new(2);
        let h1 = Hash::digest(b"1");
        let h2 = Hash::digest(b"2");
        let h3 = Hash::digest(b"3");

        cache.contains_or_add(h1);
        cache.contains_or_add(h2);
        cache.contains_or_add(h3);

        // h1 was evicted and is announceable again.
        assert!(!cache.contains_or_add(h1));
    }
}
