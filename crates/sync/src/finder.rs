//! Common-ancestor discovery.

use crate::{SyncConfig, SyncContext, SyncError};
use meridian_core::{ChainHandle, PeerRequest, SyncerHandle, SyncerMsg};
use meridian_types::{BlockInfo, BlockNo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The syncer's grip on a running finder.
pub(crate) struct FinderHandle {
    /// Ancestor responses routed here ("linear scan channel").
    pub lscan_tx: mpsc::Sender<Option<BlockInfo>>,
    join: JoinHandle<()>,
}

impl FinderHandle {
    /// Stop the task. In-flight peer responses die at the syncer's idle
    /// filter afterwards.
    pub(crate) fn stop(self) {
        self.join.abort();
    }
}

/// Start the finder for a session.
///
/// Strategy: offer the peer a geometric sample of our canonical hashes in
/// one round; if the peer recognizes none of them, fall back to scanning
/// single hashes backward from our best block. Either way the outcome goes
/// back to the syncer as a [`SyncerMsg::FinderResult`].
pub(crate) fn spawn_finder(
    ctx: &SyncContext,
    cfg: &SyncConfig,
    chain: ChainHandle,
    peer_tx: mpsc::Sender<PeerRequest>,
    syncer: SyncerHandle,
) -> FinderHandle {
    let (lscan_tx, lscan_rx) = mpsc::channel(8);
    let peer = ctx.peer.clone();
    let best_no = ctx.best_no;
    let timeout = cfg.fetch_timeout;

    let join = tokio::spawn(async move {
        let result = run_finder(best_no, peer, chain, peer_tx, lscan_rx, timeout).await;
        match &result {
            Ok(ancestor) => {
                tracing::info!(no = ancestor.no, hash = %ancestor.hash, "common ancestor found")
            }
            Err(e) => tracing::error!(err = %e, "finder failed"),
        }

        syncer
            .send(SyncerMsg::FinderResult {
                ancestor: result.as_ref().ok().copied(),
                error: result.err().map(|e| e.to_string()),
            })
            .await;
    });

    FinderHandle { lscan_tx, join }
}

async fn run_finder(
    best_no: BlockNo,
    peer: meridian_types::PeerId,
    chain: ChainHandle,
    peer_tx: mpsc::Sender<PeerRequest>,
    mut lscan_rx: mpsc::Receiver<Option<BlockInfo>>,
    timeout: std::time::Duration,
) -> Result<BlockInfo, SyncError> {
    // Round one: geometric anchors.
    let anchors = chain.get_anchors().await.map_err(|e| SyncError::Chain(e.to_string()))?;
    if anchors.is_empty() {
        return Err(SyncError::FinderInternal);
    }

    tracing::debug!(candidates = anchors.len(), "probing peer with anchors");
    peer_tx
        .send(PeerRequest::GetSyncAncestor {
            to: peer.clone(),
            hashes: anchors,
        })
        .await
        .map_err(|_| SyncError::Quit)?;

    if let Some(ancestor) = recv_ancestor(&mut lscan_rx, timeout).await? {
        return Ok(ancestor);
    }

    // Fallback: linear backward scan, one hash per round, down to genesis.
    tracing::debug!(best_no, "anchor probe found nothing, scanning backward");
    let mut no = best_no;
    loop {
        let block = chain
            .get_block_by_no(no)
            .await
            .map_err(|e| SyncError::Chain(e.to_string()))?;
        peer_tx
            .send(PeerRequest::GetSyncAncestor {
                to: peer.clone(),
                hashes: vec![block.hash()],
            })
            .await
            .map_err(|_| SyncError::Quit)?;

        if let Some(ancestor) = recv_ancestor(&mut lscan_rx, timeout).await? {
            return Ok(ancestor);
        }
        if no == 0 {
            return Err(SyncError::FinderInternal);
        }
        no -= 1;
    }
}

async fn recv_ancestor(
    lscan_rx: &mut mpsc::Receiver<Option<BlockInfo>>,
    timeout: std::time::Duration,
) -> Result<Option<BlockInfo>, SyncError> {
    match tokio::time::timeout(timeout, lscan_rx.recv()).await {
        Err(_) => Err(SyncError::Timeout("ancestor response".into())),
        Ok(None) => Err(SyncError::Quit),
        Ok(Some(ancestor)) => Ok(ancestor),
    }
}
