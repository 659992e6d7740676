//! The syncer task: session lifecycle and message routing.

use crate::{
    spawn_block_fetcher, spawn_finder, spawn_hash_fetcher, BlockFetcherHandle, FetcherRsp, FinderHandle,
    HashFetcherHandle, SyncConfig, SyncContext, SyncError,
};
use meridian_core::{ChainHandle, PeerRequest, SyncTask, SyncerHandle, SyncerMsg, DEFAULT_CHANNEL_CAPACITY};
use meridian_types::{BlockInfo, BlockNo, PeerId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running session's moving parts.
struct SyncSession {
    ctx: SyncContext,
    finder: Option<FinderHandle>,
    hash_fetcher: Option<HashFetcherHandle>,
    block_fetcher: Option<BlockFetcherHandle>,
}

impl SyncSession {
    /// Tear the session down. Sub-tasks are aborted; their in-flight
    /// responses get dropped by the idle filter afterwards.
    fn stop(self) {
        if let Some(finder) = self.finder {
            finder.stop();
        }
        if let Some(hf) = self.hash_fetcher {
            hf.stop();
        }
        if let Some(bf) = self.block_fetcher {
            bf.stop();
        }
    }
}

/// The sync engine's front door.
///
/// Owns at most one session at a time. Messages that only make sense inside
/// a session are discarded while idle, which is also what disposes of
/// stragglers from a session that was just reset.
pub struct Syncer {
    cfg: SyncConfig,
    chain: ChainHandle,
    peer_tx: mpsc::Sender<PeerRequest>,
    handle: SyncerHandle,
    session: Option<SyncSession>,
}

impl Syncer {
    /// Start the syncer task. Returns the handle the chain service and the
    /// peer layer use to reach it.
    pub fn spawn(
        cfg: SyncConfig,
        chain: ChainHandle,
        peer_tx: mpsc::Sender<PeerRequest>,
    ) -> (SyncerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let handle = SyncerHandle::new(tx);

        let mut syncer = Syncer {
            cfg,
            chain,
            peer_tx,
            handle: handle.clone(),
            session: None,
        };

        let join = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                syncer.handle_msg(msg).await;
            }
            tracing::info!("syncer stopped");
        });

        (handle, join)
    }

    async fn handle_msg(&mut self, msg: SyncerMsg) {
        // Garbage filter: session responses without a session are leftovers
        // from a reset and must not start anything.
        if self.session.is_none() && msg.is_session_response() {
            tracing::debug!(msg = msg.type_name(), "dropped message, no session running");
            return;
        }

        match msg {
            SyncerMsg::SyncStart { peer, target_no } => {
                if let Err(e) = self.handle_sync_start(peer, target_no).await {
                    tracing::error!(err = %e, "sync start failed");
                }
            }
            SyncerMsg::GetSyncAncestorRsp { ancestor } => {
                if let Some(finder) = self.session.as_ref().and_then(|s| s.finder.as_ref()) {
                    if finder.lscan_tx.try_send(ancestor).is_err() {
                        tracing::debug!("finder busy, ancestor response dropped");
                    }
                }
            }
            SyncerMsg::FinderResult { ancestor, error } => {
                if let Err(e) = self.handle_finder_result(ancestor, error).await {
                    tracing::error!(err = %e, "finder result failed");
                    self.reset();
                }
            }
            SyncerMsg::GetHashesRsp { hashes, error } => {
                if let Some(hf) = self.session.as_ref().and_then(|s| s.hash_fetcher.as_ref()) {
                    let payload = match error {
                        Some(e) => Err(e),
                        None => Ok(hashes),
                    };
                    if hf.rsp_tx.try_send(payload).is_err() {
                        tracing::debug!("hash fetcher busy, response dropped");
                    }
                }
            }
            SyncerMsg::GetBlockChunksRsp { from, blocks } => {
                self.forward_to_fetcher(FetcherRsp::Chunks { from, blocks }).await;
            }
            SyncerMsg::AddBlockRsp { block, error } => {
                self.forward_to_fetcher(FetcherRsp::AddBlock { block, error }).await;
            }
            SyncerMsg::CloseFetcher { from } => match from {
                SyncTask::HashFetcher => {
                    if let Some(session) = &mut self.session {
                        if let Some(hf) = session.hash_fetcher.take() {
                            hf.stop();
                        }
                    }
                }
                SyncTask::BlockFetcher => {
                    if let Some(session) = &mut self.session {
                        if let Some(bf) = session.block_fetcher.take() {
                            bf.stop();
                        }
                    }
                }
                other => {
                    tracing::error!(task = %other, "invalid close request");
                }
            },
            SyncerMsg::SyncStop { from, error } => {
                match &error {
                    None => tracing::info!(from = %from, "syncer finished"),
                    Some(e) => tracing::info!(from = %from, err = %e, "syncer finished by error"),
                }
                self.reset();
            }
        }
    }

    async fn handle_sync_start(&mut self, peer: PeerId, target_no: BlockNo) -> Result<(), SyncError> {
        tracing::debug!(target_no, "sync requested");

        if self.session.is_some() {
            tracing::debug!(target_no, "skipped, syncer is running");
            return Ok(());
        }

        // A failure to read our own best block aborts the start outright.
        let best = self
            .chain
            .get_best_block()
            .await
            .map_err(|e| SyncError::Chain(e.to_string()))?;
        let best_no = best.block_no();

        if target_no <= best_no {
            tracing::debug!(target_no, best_no, "skipped, requested number is too low");
            return Ok(());
        }

        tracing::info!(target_no, best_no, peer = %peer, "sync started");
        let ctx = SyncContext::new(peer, target_no, best_no);
        let finder = spawn_finder(&ctx, &self.cfg, self.chain.clone(), self.peer_tx.clone(), self.handle.clone());

        self.session = Some(SyncSession {
            ctx,
            finder: Some(finder),
            hash_fetcher: None,
            block_fetcher: None,
        });
        Ok(())
    }

    async fn handle_finder_result(
        &mut self,
        ancestor: Option<BlockInfo>,
        error: Option<String>,
    ) -> Result<(), SyncError> {
        if let Some(e) = error {
            tracing::error!(err = %e, "find ancestor failed");
            return Err(SyncError::FinderInternal);
        }
        let ancestor = ancestor.ok_or(SyncError::FinderInternal)?;

        // The ancestor must be a block we actually have.
        self.chain
            .get_block(ancestor.hash)
            .await
            .map_err(|e| SyncError::Chain(e.to_string()))?;

        let Some(session) = &mut self.session else {
            return Err(SyncError::Quit);
        };
        session.ctx.set_ancestor(ancestor);
        if let Some(finder) = session.finder.take() {
            finder.stop();
        }

        let block_fetcher = spawn_block_fetcher(
            &session.ctx,
            &self.cfg,
            self.chain.clone(),
            self.peer_tx.clone(),
            self.handle.clone(),
        );
        let hash_fetcher = spawn_hash_fetcher(
            &session.ctx,
            &self.cfg,
            self.peer_tx.clone(),
            block_fetcher.hf_tx.clone(),
            self.handle.clone(),
        );

        session.block_fetcher = Some(block_fetcher);
        session.hash_fetcher = Some(hash_fetcher);
        Ok(())
    }

    async fn forward_to_fetcher(&mut self, rsp: FetcherRsp) {
        if let Some(bf) = self.session.as_ref().and_then(|s| s.block_fetcher.as_ref()) {
            if bf.rsp_tx.send(rsp).await.is_err() {
                tracing::debug!("block fetcher gone, response dropped");
            }
        }
    }

    /// Drop the session and every sub-task. The next orphan starts over.
    fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(
                target_no = session.ctx.target_no,
                best_no = session.ctx.best_no,
                "sync session reset"
            );
            session.stop();
        }
    }
}
