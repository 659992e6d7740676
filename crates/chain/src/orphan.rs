//! The orphan pool.

use crate::OrphanPoolConfig;
use meridian_types::{Block, Hash};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Instant;

/// A cached orphan and when it stops being resolvable.
#[derive(Debug)]
struct OrphanEntry {
    block: Block,
    expiry: Instant,
}

/// Bounded cache of blocks whose parent is not yet known.
///
/// Keyed by the missing parent's hash, since the only lookup ever made is
/// "the parent just arrived, is one of its children waiting?". Insertion order is
/// kept separately for FIFO eviction when the pool is full.
#[derive(Debug)]
pub struct OrphanPool {
    cfg: OrphanPoolConfig,
    by_parent: HashMap<Hash, OrphanEntry>,
    order: VecDeque<Hash>,
}

impl OrphanPool {
    /// Create an empty pool.
    pub fn new(cfg: OrphanPoolConfig) -> Self {
        Self {
            cfg,
            by_parent: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Number of cached orphans.
    pub fn len(&self) -> usize {
        self.by_parent.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.by_parent.is_empty()
    }

    /// Cache an orphan. Idempotent: re-adding a cached block is a no-op, and
    /// a second orphan under the same missing parent keeps the first.
    pub fn add(&mut self, block: Block) {
        let parent = block.prev_hash();
        if let Some(existing) = self.by_parent.get(&parent) {
            if existing.block.hash() == block.hash() {
                return;
            }
            tracing::debug!(parent = %parent, kept = %existing.block.hash(), dropped = %block.hash(),
                "second orphan for same parent dropped");
            return;
        }

        if self.by_parent.len() >= self.cfg.capacity as usize {
            if let Some(evicted) = self.order.pop_front() {
                self.by_parent.remove(&evicted);
                tracing::debug!(parent = %evicted, "orphan evicted, pool full");
            }
        }

        tracing::debug!(hash = %block.hash(), parent = %parent, "orphan cached");
        self.by_parent.insert(
            parent,
            OrphanEntry {
                block,
                expiry: Instant::now() + self.cfg.ttl,
            },
        );
        self.order.push_back(parent);
    }

    /// Remove and return the cached child of `parent_hash`, if it is still
    /// fresh.
    pub fn resolve(&mut self, parent_hash: Hash) -> Option<Block> {
        let entry = self.by_parent.remove(&parent_hash)?;
        self.order.retain(|h| *h != parent_hash);

        if entry.expiry <= Instant::now() {
            tracing::debug!(parent = %parent_hash, hash = %entry.block.hash(), "orphan expired");
            return None;
        }
        Some(entry.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{Address, BlockBody, BlockHeader};
    use std::time::Duration;

    fn orphan(parent: Hash, no: u64) -> Block {
        Block::new(
            BlockHeader {
                block_no: no,
                prev_hash: parent,
                blocks_root_hash: Hash::ZERO,
                timestamp: no as i64,
                coinbase: Address::default(),
                consensus: vec![],
            },
            BlockBody::default(),
        )
    }

    fn pool(capacity: u32) -> OrphanPool {
        OrphanPool::new(OrphanPoolConfig {
            capacity,
            ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_resolve_removes_the_child() {
        let mut pool = pool(4);
        let parent = Hash::digest(b"parent");
        let block = orphan(parent, 5);

        pool.add(block.clone());
        assert_eq!(pool.resolve(parent).map(|b| b.hash()), Some(block.hash()));
        assert!(pool.resolve(parent).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut pool = pool(4);
        let parent = Hash::digest(b"parent");
        pool.add(orphan(parent, 5));
        pool.add(orphan(parent, 5));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_full_pool_evicts_oldest() {
        let mut pool = pool(2);
        let p1 = Hash::digest(b"p1");
        let p2 = Hash::digest(b"p2");
        let p3 = Hash::digest(b"p3");

        pool.add(orphan(p1, 1));
        pool.add(orphan(p2, 2));
        pool.add(orphan(p3, 3));

        assert_eq!(pool.len(), 2);
        assert!(pool.resolve(p1).is_none());
        assert!(pool.resolve(p3).is_some());
    }

    #[test]
    fn test_expired_entry_is_not_resolved() {
        let mut pool = OrphanPool::new(OrphanPoolConfig {
            capacity: 4,
            ttl: Duration::ZERO,
        });
        let parent = Hash::digest(b"parent");
        pool.add(orphan(parent, 1));
        assert!(pool.resolve(parent).is_none());
    }
}
