//! Parallel block download.

use crate::peers::{FetchTask, PeerSet};
use crate::processor::BlockProcessor;
use crate::{SyncConfig, SyncContext, SyncError};
use meridian_core::{ChainHandle, PeerRequest, SyncTask, SyncerHandle, SyncerMsg};
use meridian_types::{Block, Hash, PeerId};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A round of hashes produced by the hash fetcher.
#[derive(Debug, Clone)]
pub struct HashSet {
    /// Hashes in chain order.
    pub hashes: Vec<Hash>,

    /// `hashes.len()`.
    pub count: usize,
}

impl HashSet {
    /// Wrap a round of hashes.
    pub fn new(hashes: Vec<Hash>) -> Self {
        let count = hashes.len();
        Self { hashes, count }
    }
}

/// A response routed to the fetcher by the syncer.
#[derive(Debug)]
pub(crate) enum FetcherRsp {
    /// A peer answered `GetBlockChunks`.
    Chunks {
        /// The responding peer.
        from: PeerId,
        /// Downloaded blocks, chain order.
        blocks: Vec<Block>,
    },

    /// The chain service finished one sync-issued `AddBlock`.
    AddBlock {
        /// The connected block, on success.
        block: Option<meridian_types::BlockInfo>,
        /// The failure, otherwise.
        error: Option<String>,
    },
}

/// The syncer's grip on a running block fetcher.
pub(crate) struct BlockFetcherHandle {
    /// Hash rounds from the hash fetcher.
    pub hf_tx: mpsc::Sender<HashSet>,
    /// Peer and chain responses.
    pub rsp_tx: mpsc::Sender<FetcherRsp>,
    join: JoinHandle<()>,
}

impl BlockFetcherHandle {
    pub(crate) fn stop(self) {
        self.join.abort();
    }
}

/// Start the block fetcher for a session.
pub(crate) fn spawn_block_fetcher(
    ctx: &SyncContext,
    cfg: &SyncConfig,
    chain: ChainHandle,
    peer_tx: mpsc::Sender<PeerRequest>,
    syncer: SyncerHandle,
) -> BlockFetcherHandle {
    let (hf_tx, hf_rx) = mpsc::channel(4);
    let (rsp_tx, rsp_rx) = mpsc::channel(64);

    let ancestor = ctx
        .common_ancestor
        .expect("block fetcher starts after the finder");
    let processor = BlockProcessor::new(
        ancestor,
        ctx.target_no,
        ctx.peer.clone(),
        chain,
        syncer.clone(),
        cfg.max_pending_tasks.max(1) * cfg.max_fetch_task.max(1),
    );

    let fetcher = Fetcher {
        cfg: cfg.clone(),
        peers: PeerSet::new(),
        pending: VecDeque::new(),
        running: Vec::new(),
        next_task: None,
        hf_rx,
        peer_tx,
        syncer,
        processor,
    };

    let join = tokio::spawn(fetcher.run(rsp_rx));

    BlockFetcherHandle { hf_tx, rsp_tx, join }
}

struct Fetcher {
    cfg: SyncConfig,
    peers: PeerSet,
    pending: VecDeque<FetchTask>,
    running: Vec<FetchTask>,
    next_task: Option<FetchTask>,
    hf_rx: mpsc::Receiver<HashSet>,
    peer_tx: mpsc::Sender<PeerRequest>,
    syncer: SyncerHandle,
    processor: BlockProcessor,
}

impl Fetcher {
    async fn run(mut self, mut rsp_rx: mpsc::Receiver<FetcherRsp>) {
        if let Err(e) = self.init().await {
            self.stop_with(Some(e)).await;
            return;
        }

        let mut tick = tokio::time::interval(self.cfg.sched_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.check_task_timeout();
                }
                rsp = rsp_rx.recv() => match rsp {
                    Some(rsp) => {
                        if let Err(e) = self.handle_rsp(rsp).await {
                            tracing::error!(err = %e, "invalid block response message");
                            self.stop_with(Some(e)).await;
                            return;
                        }
                    }
                    None => {
                        tracing::info!("block fetcher exited");
                        return;
                    }
                },
            }

            if let Err(e) = self.schedule().await {
                tracing::error!(err = %e, "block fetcher schedule failed");
                self.stop_with(Some(e)).await;
                return;
            }
        }
    }

    /// Learn the current peer roster from the peer layer.
    async fn init(&mut self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.peer_tx
            .send(PeerRequest::GetPeers { reply })
            .await
            .map_err(|_| SyncError::Quit)?;

        let peers = tokio::time::timeout(self.cfg.fetch_timeout, rx)
            .await
            .map_err(|_| SyncError::Timeout("peer roster".into()))?
            .map_err(|_| SyncError::Quit)?;

        if peers.is_empty() {
            return Err(SyncError::AllPeerBad);
        }
        for id in peers {
            self.peers.add_new(id);
        }
        tracing::info!(peers = self.peers.total(), "block fetcher initialized");
        Ok(())
    }

    async fn stop_with(&mut self, error: Option<SyncError>) {
        self.syncer
            .send(SyncerMsg::SyncStop {
                from: SyncTask::BlockFetcher,
                error: error.map(|e| e.to_string()),
            })
            .await;
    }

    /// Requeue tasks whose peer has gone quiet, charging the peer.
    fn check_task_timeout(&mut self) {
        let now = Instant::now();
        let timeout = self.cfg.fetch_timeout;

        let mut i = 0;
        while i < self.running.len() {
            if !self.running[i].is_timed_out(now, timeout) {
                i += 1;
                continue;
            }

            let mut task = self.running.remove(i);
            if let Some(peer) = task.peer.take() {
                self.peers.process_fail(peer, self.cfg.max_peer_fail_count);
            }
            task.started = None;

            tracing::debug!(
                start = %task.hashes.first().map(|h| h.to_string()).unwrap_or_default(),
                count = task.count,
                "timed out task pushed back to pending queue"
            );
            self.pending.push_front(task);
        }
    }

    /// Assign work: pick the next task and a free peer, then send the
    /// download request.
    async fn schedule(&mut self) -> Result<(), SyncError> {
        if self.next_task.is_none() {
            self.set_next_task();
        }
        if self.next_task.is_none() {
            return Ok(());
        }
        if self.running.len() >= self.cfg.max_running_tasks {
            return Ok(());
        }

        let Some(peer) = self.peers.pop_free()? else {
            return Ok(());
        };

        let mut task = self.next_task.take().expect("checked above");
        task.started = Some(Instant::now());

        let request = PeerRequest::GetBlockChunks {
            to: peer.id.clone(),
            hashes: task.hashes.clone(),
            ttl: self.cfg.fetch_timeout,
        };
        task.peer = Some(peer);
        self.running.push(task);

        self.peer_tx.send(request).await.map_err(|_| SyncError::Quit)?;
        Ok(())
    }

    /// Refill `next_task` from the pending queue, splitting a fresh hash set
    /// into tasks when the queue has drained.
    fn set_next_task(&mut self) {
        if self.pending.is_empty() {
            match self.hf_rx.try_recv() {
                Ok(hash_set) => self.add_new_tasks(hash_set),
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => {}
            }
        }
        self.next_task = self.pending.pop_front();
    }

    fn add_new_tasks(&mut self, hash_set: HashSet) {
        tracing::debug!(
            start = %hash_set.hashes.first().map(|h| h.to_string()).unwrap_or_default(),
            count = hash_set.count,
            "new fetch tasks from hash set"
        );

        let chunk = self.cfg.max_fetch_task.max(1);
        for hashes in hash_set.hashes.chunks(chunk) {
            self.pending.push_back(FetchTask::new(hashes.to_vec()));
        }
    }

    async fn handle_rsp(&mut self, rsp: FetcherRsp) -> Result<(), SyncError> {
        match rsp {
            FetcherRsp::Chunks { from, blocks } => {
                self.validate_chunks(&from, &blocks)?;

                let task = self.find_finished(&from, &blocks)?;
                if let Some(peer) = task.peer {
                    self.peers.push_free(peer);
                }

                self.processor.handle_blocks(blocks).await
            }
            FetcherRsp::AddBlock { block, error } => {
                self.processor.handle_add_block_rsp(block, error, &self.syncer).await
            }
        }
    }

    fn validate_chunks(&self, from: &PeerId, blocks: &[Block]) -> Result<(), SyncError> {
        if blocks.is_empty() {
            return Err(SyncError::Msg("blocks is empty".into()));
        }
        if from.0.is_empty() {
            return Err(SyncError::Msg("block chunk response without sender".into()));
        }
        for pair in blocks.windows(2) {
            if pair[1].prev_hash() != pair[0].hash() {
                return Err(SyncError::Msg("blocks hash not matched".into()));
            }
        }
        Ok(())
    }

    /// Find and remove the running task this response answers.
    fn find_finished(&mut self, from: &PeerId, blocks: &[Block]) -> Result<FetchTask, SyncError> {
        let pos = self
            .running
            .iter()
            .position(|task| task.is_matched(from, blocks))
            .ok_or_else(|| SyncError::Msg(format!("no matching task for chunk from {from}")))?;

        let task = self.running.remove(pos);
        tracing::debug!(
            start = %task.hashes.first().map(|h| h.to_string()).unwrap_or_default(),
            count = task.count,
            "task finished"
        );
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_set_splits_into_bounded_tasks() {
        let hashes: Vec<Hash> = (0..40u64).map(|i| Hash::digest(&i.to_be_bytes())).collect();

        let (_hf_tx, hf_rx) = mpsc::channel(1);
        let (peer_tx, _peer_rx) = mpsc::channel(1);
        let (sync_tx, _sync_rx) = mpsc::channel(1);
        let (chain_tx, _chain_rx) = mpsc::channel(1);

        let mut fetcher = Fetcher {
            cfg: SyncConfig::default().with_max_fetch_task(16),
            peers: PeerSet::new(),
            pending: VecDeque::new(),
            running: Vec::new(),
            next_task: None,
            hf_rx,
            peer_tx,
            syncer: SyncerHandle::new(sync_tx),
            processor: BlockProcessor::new(
                meridian_types::BlockInfo {
                    hash: Hash::ZERO,
                    no: 0,
                },
                40,
                PeerId::new("p"),
                ChainHandle::new(chain_tx),
                SyncerHandle::new(mpsc::channel(1).0),
                16,
            ),
        };

        fetcher.add_new_tasks(HashSet::new(hashes));
        let sizes: Vec<usize> = fetcher.pending.iter().map(|t| t.count).collect();
        assert_eq!(sizes, vec![16, 16, 8]);
    }
}
