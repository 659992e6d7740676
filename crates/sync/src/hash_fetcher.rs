//! Hash-range fetching.

use crate::block_fetcher::HashSet;
use crate::{SyncConfig, SyncContext, SyncError};
use meridian_core::{PeerRequest, SyncTask, SyncerHandle, SyncerMsg};
use meridian_types::{BlockInfo, Hash};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The syncer's grip on a running hash fetcher.
pub(crate) struct HashFetcherHandle {
    /// `GetHashesRsp` payloads routed here.
    pub rsp_tx: mpsc::Sender<Result<Vec<Hash>, String>>,
    join: JoinHandle<()>,
}

impl HashFetcherHandle {
    pub(crate) fn stop(self) {
        self.join.abort();
    }
}

/// Start the hash fetcher for a session.
///
/// Walks from one past the common ancestor toward the target in rounds of
/// `hash_req_size`, pushing each round into the block fetcher's hash channel
/// and stopping when the target is covered. A timeout or bad round asks the
/// syncer to close this fetcher and stops the session.
pub(crate) fn spawn_hash_fetcher(
    ctx: &SyncContext,
    cfg: &SyncConfig,
    peer_tx: mpsc::Sender<PeerRequest>,
    hf_tx: mpsc::Sender<HashSet>,
    syncer: SyncerHandle,
) -> HashFetcherHandle {
    let (rsp_tx, rsp_rx) = mpsc::channel(8);
    let ancestor = ctx
        .common_ancestor
        .expect("hash fetcher starts after the finder");
    let peer = ctx.peer.clone();
    let target_no = ctx.target_no;
    let req_size = cfg.hash_req_size;
    let timeout = cfg.fetch_timeout;

    let join = tokio::spawn(async move {
        let outcome = run_rounds(ancestor, target_no, req_size, timeout, peer, peer_tx, hf_tx, rsp_rx).await;
        match outcome {
            Ok(()) => {
                tracing::info!(target_no, "hash fetcher finished");
            }
            Err(SyncError::Quit) => {}
            Err(e) => {
                tracing::error!(err = %e, "hash fetcher failed");
                syncer.send(SyncerMsg::CloseFetcher { from: SyncTask::HashFetcher }).await;
                syncer
                    .send(SyncerMsg::SyncStop {
                        from: SyncTask::HashFetcher,
                        error: Some(e.to_string()),
                    })
                    .await;
            }
        }
    });

    HashFetcherHandle { rsp_tx, join }
}

#[allow(clippy::too_many_arguments)]
async fn run_rounds(
    ancestor: BlockInfo,
    target_no: u64,
    req_size: u64,
    timeout: std::time::Duration,
    peer: meridian_types::PeerId,
    peer_tx: mpsc::Sender<PeerRequest>,
    hf_tx: mpsc::Sender<HashSet>,
    mut rsp_rx: mpsc::Receiver<Result<Vec<Hash>, String>>,
) -> Result<(), SyncError> {
    let mut prev = ancestor;

    while prev.no < target_no {
        let count = req_size.min(target_no - prev.no);
        tracing::debug!(from = prev.no + 1, count, "requesting hash round");
        peer_tx
            .send(PeerRequest::GetHashes {
                to: peer.clone(),
                prev,
                count,
            })
            .await
            .map_err(|_| SyncError::Quit)?;

        let hashes = match tokio::time::timeout(timeout, rsp_rx.recv()).await {
            Err(_) => return Err(SyncError::Timeout("hash response".into())),
            Ok(None) => return Err(SyncError::Quit),
            Ok(Some(Err(e))) => return Err(SyncError::Msg(e)),
            Ok(Some(Ok(hashes))) => hashes,
        };

        if hashes.is_empty() || hashes.len() as u64 > count {
            return Err(SyncError::Msg(format!(
                "bad hash round: got {} hashes, asked for {}",
                hashes.len(),
                count
            )));
        }

        let last = *hashes.last().expect("non-empty round");
        let len = hashes.len() as u64;
        if hf_tx.send(HashSet::new(hashes)).await.is_err() {
            // Block fetcher is gone; the session is over.
            return Err(SyncError::Quit);
        }

        prev = BlockInfo {
            hash: last,
            no: prev.no + len,
        };
    }

    Ok(())
}
