//! Sync peers and fetch tasks.

use crate::SyncError;
use meridian_types::{Block, Hash, PeerId};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A peer participating in the session.
#[derive(Debug, Clone)]
pub(crate) struct SyncPeer {
    /// Sequence number, assigned at registration.
    pub no: usize,

    /// Transport identity.
    pub id: PeerId,

    /// Timeouts charged to this peer so far.
    pub fail_count: u32,
}

/// The session's peer rotation: a free list to draw from and a bad set for
/// peers that failed too often.
#[derive(Debug, Default)]
pub(crate) struct PeerSet {
    total: usize,
    free: VecDeque<SyncPeer>,
    bad: Vec<SyncPeer>,
}

impl PeerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a peer and put it on the free list.
    pub(crate) fn add_new(&mut self, id: PeerId) {
        let peer = SyncPeer {
            no: self.total,
            id,
            fail_count: 0,
        };
        self.total += 1;
        tracing::info!(peer = %peer.id, no = peer.no, "new peer added");
        self.free.push_back(peer);
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Whether every registered peer has gone bad.
    pub(crate) fn is_all_bad(&self) -> bool {
        self.total > 0 && self.bad.len() == self.total
    }

    /// Draw a free peer. `Ok(None)` means every healthy peer is busy;
    /// [`SyncError::AllPeerBad`] means nobody is left at all.
    pub(crate) fn pop_free(&mut self) -> Result<Option<SyncPeer>, SyncError> {
        if self.is_all_bad() {
            return Err(SyncError::AllPeerBad);
        }
        let peer = self.free.pop_front();
        if let Some(peer) = &peer {
            tracing::debug!(peer = %peer.id, no = peer.no, "pop free peer");
        }
        Ok(peer)
    }

    /// Return a peer to the free list.
    pub(crate) fn push_free(&mut self, peer: SyncPeer) {
        tracing::debug!(peer = %peer.id, free = self.free.len() + 1, "free peer added");
        self.free.push_back(peer);
    }

    /// Charge a failure. The peer moves to the bad set once it exceeds
    /// `max_fail_count`; otherwise it rejoins the rotation.
    pub(crate) fn process_fail(&mut self, mut peer: SyncPeer, max_fail_count: u32) {
        peer.fail_count += 1;
        if peer.fail_count > max_fail_count {
            tracing::info!(peer = %peer.id, fails = peer.fail_count, "peer moved to bad set");
            self.bad.push(peer);
        } else {
            self.free.push_back(peer);
        }
    }
}

/// A contiguous hash range assigned to one peer for download.
#[derive(Debug)]
pub(crate) struct FetchTask {
    /// Hashes to download, chain order.
    pub hashes: Vec<Hash>,

    /// `hashes.len()`, kept for response matching.
    pub count: usize,

    /// The peer working on this task, while running.
    pub peer: Option<SyncPeer>,

    /// When the task was handed to its peer.
    pub started: Option<Instant>,
}

impl FetchTask {
    pub(crate) fn new(hashes: Vec<Hash>) -> Self {
        let count = hashes.len();
        Self {
            hashes,
            count,
            peer: None,
            started: None,
        }
    }

    /// Whether the task has been running longer than `timeout`.
    pub(crate) fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        match self.started {
            Some(started) => {
                let timed_out = now.duration_since(started) > timeout;
                if timed_out {
                    if let (Some(peer), Some(first)) = (&self.peer, self.hashes.first()) {
                        tracing::info!(peer = %peer.id, start = %first, count = self.count, "fetch task timed out");
                    }
                }
                timed_out
            }
            None => false,
        }
    }

    /// Whether `blocks` from `peer_id` is the response to this task: same
    /// peer, same count, and every hash in order.
    pub(crate) fn is_matched(&self, peer_id: &PeerId, blocks: &[Block]) -> bool {
        let Some(peer) = &self.peer else {
            return false;
        };
        if peer.id != *peer_id || blocks.len() != self.count {
            return false;
        }
        self.hashes
            .iter()
            .zip(blocks.iter())
            .all(|(hash, block)| *hash == block.hash())
    }
}
