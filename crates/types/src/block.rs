//! Blocks and the chain's number/hash addressing.

use crate::{Address, Hash, SignedTx};
use serde::{Deserialize, Serialize};

/// A height on the chain. Genesis is 0.
pub type BlockNo = u64;

/// Encode a block number the way the chain index keys it: 8-byte big-endian.
pub fn block_no_to_bytes(no: BlockNo) -> [u8; 8] {
    no.to_be_bytes()
}

/// Decode an index key back into a block number. Returns `None` on bad length.
pub fn block_no_from_bytes(bytes: &[u8]) -> Option<BlockNo> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(BlockNo::from_be_bytes(arr))
}

/// The agreed-upon part of a block. The block hash covers exactly these
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height of this block.
    pub block_no: BlockNo,

    /// Hash of the parent block. Zero for genesis.
    pub prev_hash: Hash,

    /// Root of the world state *after* applying this block.
    pub blocks_root_hash: Hash,

    /// Unix timestamp (seconds) stamped by the producer.
    pub timestamp: i64,

    /// Account credited with the block reward.
    pub coinbase: Address,

    /// Opaque consensus payload (proof, signatures). Interpreted only by the
    /// consensus engine.
    pub consensus: Vec<u8>,
}

impl BlockHeader {
    /// Compute the hash of this header.
    ///
    /// Field-by-field concatenation keeps the digest independent of the value
    /// codec used for storage.
    pub fn calculate_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(96 + self.coinbase.as_bytes().len() + self.consensus.len());
        data.extend_from_slice(&self.block_no.to_be_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.blocks_root_hash.as_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(self.coinbase.as_bytes());
        data.extend_from_slice(&self.consensus);
        Hash::digest(&data)
    }
}

/// The transactions carried by a block, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Ordered transactions. Receipts mirror this order.
    pub txs: Vec<SignedTx>,
}

/// A full block: header, body and the cached header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// `H(header)`, computed once the header is final.
    pub hash: Hash,

    /// The agreed-upon header.
    pub header: BlockHeader,

    /// The transaction payload.
    pub body: BlockBody,
}

impl Block {
    /// Seal a header and body into a block, computing the hash.
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        let hash = header.calculate_hash();
        Self { hash, header, body }
    }

    /// Height of this block.
    pub fn block_no(&self) -> BlockNo {
        self.header.block_no
    }

    /// Hash of this block.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Hash of the parent block.
    pub fn prev_hash(&self) -> Hash {
        self.header.prev_hash
    }

    /// Recompute the header hash. Differs from [`Block::hash`] only when the
    /// block was tampered with in transit.
    pub fn calculate_hash(&self) -> Hash {
        self.header.calculate_hash()
    }

    /// The `(hash, no)` pair identifying this block.
    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            hash: self.hash,
            no: self.header.block_no,
        }
    }
}

/// A lightweight block reference: hash plus height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block hash.
    pub hash: Hash,

    /// Block height.
    pub no: BlockNo,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(no: BlockNo) -> BlockHeader {
        BlockHeader {
            block_no: no,
            prev_hash: Hash::ZERO,
            blocks_root_hash: Hash::ZERO,
            timestamp: 1_700_000_000,
            coinbase: Address::from_name("bp"),
            consensus: vec![],
        }
    }

    #[test]
    fn test_block_no_round_trips_big_endian() {
        let bytes = block_no_to_bytes(0x0102_0304_0506_0708);
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(block_no_from_bytes(&bytes), Some(0x0102_0304_0506_0708));
        assert_eq!(block_no_from_bytes(&bytes[..4]), None);
    }

    #[test]
    fn test_hash_covers_every_header_field() {
        let base = header(3);

        let mut bumped = base.clone();
        bumped.block_no += 1;
        assert_ne!(base.calculate_hash(), bumped.calculate_hash());

        let mut rooted = base.clone();
        rooted.blocks_root_hash = Hash::digest(b"root");
        assert_ne!(base.calculate_hash(), rooted.calculate_hash());

        let mut stamped = base.clone();
        stamped.timestamp += 1;
        assert_ne!(base.calculate_hash(), stamped.calculate_hash());
    }

    #[test]
    fn test_sealed_block_hash_matches_header() {
        let block = Block::new(header(7), BlockBody::default());
        assert_eq!(block.hash(), block.calculate_hash());
        assert_eq!(block.info().no, 7);
    }
}
