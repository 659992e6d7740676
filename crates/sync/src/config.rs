//! Sync engine configuration.

use std::time::Duration;

/// Tunables for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hashes requested from the peer per hash-fetcher round.
    pub hash_req_size: u64,

    /// Hashes per block-fetch task; a hash set is split into tasks of this
    /// size (the last one may be smaller).
    pub max_fetch_task: usize,

    /// Maximum tasks in flight at once.
    pub max_running_tasks: usize,

    /// Maximum split-but-unassigned tasks buffered before the fetcher stops
    /// draining the hash channel.
    pub max_pending_tasks: usize,

    /// Failures a peer may accumulate before moving to the bad set.
    pub max_peer_fail_count: u32,

    /// Scheduler tick driving timeout checks and task assignment.
    pub sched_tick: Duration,

    /// How long a task may run on a peer before it is requeued.
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hash_req_size: 100,
            max_fetch_task: 16,
            max_running_tasks: 5,
            max_pending_tasks: 10,
            max_peer_fail_count: 1,
            sched_tick: Duration::from_millis(100),
            fetch_timeout: Duration::from_secs(100),
        }
    }
}

impl SyncConfig {
    /// Configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-task hash count.
    pub fn with_max_fetch_task(mut self, max: usize) -> Self {
        self.max_fetch_task = max;
        self
    }

    /// Set the task timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the scheduler tick.
    pub fn with_sched_tick(mut self, tick: Duration) -> Self {
        self.sched_tick = tick;
        self
    }

    /// Set the per-round hash request size.
    pub fn with_hash_req_size(mut self, size: u64) -> Self {
        self.hash_req_size = size;
        self
    }
}
