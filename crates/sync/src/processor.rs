//! Ordered hand-off of fetched blocks to the chain service.

use crate::SyncError;
use meridian_core::{ChainHandle, SyncerHandle, SyncerMsg};
use meridian_types::{Block, BlockInfo, BlockNo, PeerId};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Serializes out-of-order fetched blocks into monotonically increasing
/// `AddBlock` deliveries.
///
/// Chunks finish in whatever order peers answer; blocks park in
/// `pending_connect` (keyed by height) until the block directly after the
/// last forwarded one is available, then the buffer drains as far as it
/// connects. A dedicated connector task performs the actual `AddBlock`
/// round-trips so ordering is preserved without stalling the fetcher loop.
pub(crate) struct BlockProcessor {
    /// Last block handed to the connector.
    last_forwarded: BlockInfo,

    /// Last block the chain confirmed.
    prev_block: BlockInfo,

    /// Height the session ends at.
    target_no: BlockNo,

    /// Fetched blocks waiting for their predecessor.
    pending_connect: BTreeMap<BlockNo, Block>,

    /// Hand-off to the connector task.
    connect_tx: mpsc::Sender<Block>,
}

impl BlockProcessor {
    /// Build the processor and its connector task. Deliveries start right
    /// after `ancestor`.
    pub(crate) fn new(
        ancestor: BlockInfo,
        target_no: BlockNo,
        peer: PeerId,
        chain: ChainHandle,
        syncer: SyncerHandle,
        capacity: usize,
    ) -> Self {
        let (connect_tx, mut connect_rx) = mpsc::channel::<Block>(capacity);

        tokio::spawn(async move {
            while let Some(block) = connect_rx.recv().await {
                let info = block.info();
                let result = chain.add_block(block, None, Some(peer.clone())).await;
                let msg = match result {
                    Ok(connected) => SyncerMsg::AddBlockRsp {
                        block: Some(connected),
                        error: None,
                    },
                    Err(e) => SyncerMsg::AddBlockRsp {
                        block: Some(info),
                        error: Some(e.to_string()),
                    },
                };
                syncer.send(msg).await;
            }
        });

        Self {
            last_forwarded: ancestor,
            prev_block: ancestor,
            target_no,
            pending_connect: BTreeMap::new(),
            connect_tx,
        }
    }

    /// Number of blocks parked for ordering.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending_connect.len()
    }

    /// Accept a finished chunk and forward whatever now connects.
    pub(crate) async fn handle_blocks(&mut self, blocks: Vec<Block>) -> Result<(), SyncError> {
        for block in blocks {
            self.pending_connect.insert(block.block_no(), block);
        }
        self.drain_connectable().await
    }

    /// The chain confirmed a block; advance and detect completion.
    pub(crate) async fn handle_add_block_rsp(
        &mut self,
        block: Option<BlockInfo>,
        error: Option<String>,
        syncer: &SyncerHandle,
    ) -> Result<(), SyncError> {
        let Some(info) = block else {
            return Err(SyncError::Msg("add block response without block".into()));
        };
        if let Some(e) = error {
            return Err(SyncError::Msg(format!("add block failed: {e}")));
        }

        self.prev_block = info;
        tracing::debug!(block_no = info.no, "block connected");

        if info.no >= self.target_no {
            tracing::info!(target = self.target_no, "sync target reached");
            syncer
                .send(SyncerMsg::SyncStop {
                    from: meridian_core::SyncTask::BlockProcessor,
                    error: None,
                })
                .await;
        }
        Ok(())
    }

    async fn drain_connectable(&mut self) -> Result<(), SyncError> {
        loop {
            let next_no = self.last_forwarded.no + 1;
            let Some(block) = self.pending_connect.get(&next_no) else {
                return Ok(());
            };

            if block.prev_hash() != self.last_forwarded.hash {
                return Err(SyncError::Msg(format!(
                    "fetched block {} does not connect to {}",
                    block.hash(),
                    self.last_forwarded.hash
                )));
            }

            let block = self.pending_connect.remove(&next_no).expect("present");
            let info = block.info();
            if self.connect_tx.send(block).await.is_err() {
                return Err(SyncError::Quit);
            }
            self.last_forwarded = info;
        }
    }
}
