//! Wire types and consensus serialization for the SPV client.

pub mod block;
pub mod bloom;
pub mod encoding;
pub mod hash;
pub mod inventory;
pub mod merkleblock;
pub mod outpoint;
pub mod transaction;

pub use block::BlockHeader;
pub use bloom::{BloomFilter, BloomUpdate};
pub use hash::{hash160, hash_to_hex, sha256, sha256d, Hash256, ZERO_HASH};
pub use inventory::{build_inv_payload, parse_inv_payload, GetBlocks, InvType, InventoryVector};
pub use merkleblock::{merkle_root, MerkleBlock, PartialMerkleTree};
pub use outpoint::OutPoint;
pub use transaction::{ProgramHash, Transaction, TxIn, TxOut};
