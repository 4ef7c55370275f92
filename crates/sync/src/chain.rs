//! Contract between the sync engine and header-chain storage.

use std::fmt;

use spv_pow::PowError;
use spv_primitives::encoding::DecodeError;
use spv_primitives::{BlockHeader, BloomFilter, Hash256, Transaction};
use spv_storage::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    Pow(PowError),
    Store(StoreError),
    Decode(DecodeError),
    /// The first block of a batch does not attach to any stored header.
    Disconnected(Hash256),
    /// Blocks inside a batch are not a contiguous chain.
    NonContiguous(Hash256),
    Poisoned,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Pow(err) => write!(f, "proof of work: {err}"),
            ChainError::Store(err) => write!(f, "store: {err}"),
            ChainError::Decode(err) => write!(f, "decode: {err}"),
            ChainError::Disconnected(hash) => write!(
                f,
                "block {} does not connect to the stored chain",
                spv_primitives::hash_to_hex(hash)
            ),
            ChainError::NonContiguous(hash) => write!(
                f,
                "block {} does not extend the previous block of its batch",
                spv_primitives::hash_to_hex(hash)
            ),
            ChainError::Poisoned => write!(f, "chain lock poisoned"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<PowError> for ChainError {
    fn from(err: PowError) -> Self {
        ChainError::Pow(err)
    }
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}

impl From<DecodeError> for ChainError {
    fn from(err: DecodeError) -> Self {
        ChainError::Decode(err)
    }
}

/// A received filtered block with the transactions it proved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockData {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Everything a finished request window delivers, blocks in chain order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub blocks: Vec<BlockData>,
}

impl CommitBatch {
    pub fn block_hashes(&self) -> Vec<Hash256> {
        self.blocks.iter().map(|block| block.header.hash()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Blocks newly written; already stored ones are skipped.
    pub committed: Vec<Hash256>,
    /// Transactions that matched no watched address.
    pub false_positives: u32,
    pub height: u32,
}

/// Header-chain storage as seen by the sync engine.
///
/// `commit_data` must be atomic and idempotent: a batch either lands whole or
/// not at all, and re-committing stored blocks is a no-op.
pub trait Blockchain: Send + Sync {
    fn is_known_block(&self, hash: &Hash256) -> Result<bool, ChainError>;
    fn chain_tip(&self) -> Result<BlockHeader, ChainError>;
    fn height(&self) -> Result<u32, ChainError>;
    fn check_proof_of_work(&self, header: &BlockHeader) -> Result<(), ChainError>;
    /// Stores a loose transaction. Returns `true` when it turned out to be a
    /// filter false positive.
    fn commit_unconfirmed_txn(&self, tx: &Transaction) -> Result<bool, ChainError>;
    fn commit_data(&self, batch: &CommitBatch) -> Result<CommitSummary, ChainError>;
    fn block_locator(&self) -> Result<Vec<Hash256>, ChainError>;
    fn bloom_filter(&self) -> Result<BloomFilter, ChainError>;
    fn reload_addr_filter(&self) -> Result<(), ChainError>;
}
