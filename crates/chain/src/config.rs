//! Chain service configuration.

use std::time::Duration;

/// Fee debited from the sender of every normal transaction and accumulated
/// for the block producer.
pub const COINBASE_FEE: u64 = 1_000_000;

/// Maximum number of puts per store batch. `swap_chain` splits its writes at
/// this boundary.
pub const TX_BATCH_MAX: usize = 10_000;

/// Orphan pool sizing.
#[derive(Debug, Clone)]
pub struct OrphanPoolConfig {
    /// Maximum number of cached orphans; FIFO eviction beyond this.
    pub capacity: u32,

    /// How long an entry stays resolvable.
    pub ttl: Duration,
}

impl Default for OrphanPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Chain service configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Route orphan blocks to the sync engine instead of the anchors-based
    /// missing-block request.
    pub use_fast_syncer: bool,

    /// Orphan pool sizing.
    pub orphan_pool: OrphanPoolConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            use_fast_syncer: true,
            orphan_pool: OrphanPoolConfig::default(),
        }
    }
}

impl ChainConfig {
    /// Configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose between the sync engine and the anchors request for orphans.
    pub fn with_fast_syncer(mut self, enabled: bool) -> Self {
        self.use_fast_syncer = enabled;
        self
    }

    /// Set the orphan pool capacity.
    pub fn with_orphan_capacity(mut self, capacity: u32) -> Self {
        self.orphan_pool.capacity = capacity;
        self
    }
}
