//! Messages exchanged between the sync engine and its peers.

use spv_primitives::encoding::DecodeError;
use spv_primitives::{
    build_inv_payload, parse_inv_payload, BloomFilter, GetBlocks, InventoryVector, MerkleBlock,
    Transaction,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    FilterLoad(BloomFilter),
    GetBlocks(GetBlocks),
    GetData(Vec<InventoryVector>),
    Inv(Vec<InventoryVector>),
    NotFound(Vec<InventoryVector>),
    MerkleBlock(MerkleBlock),
    Tx(Transaction),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::FilterLoad(_) => "filterload",
            Message::GetBlocks(_) => "getblocks",
            Message::GetData(_) => "getdata",
            Message::Inv(_) => "inv",
            Message::NotFound(_) => "notfound",
            Message::MerkleBlock(_) => "merkleblock",
            Message::Tx(_) => "tx",
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::FilterLoad(filter) => filter.to_filterload(),
            Message::GetBlocks(request) => request.to_payload(),
            Message::GetData(entries) | Message::Inv(entries) | Message::NotFound(entries) => {
                build_inv_payload(entries)
            }
            Message::MerkleBlock(block) => block.consensus_encode(),
            Message::Tx(tx) => tx.consensus_encode(),
        }
    }

    pub fn decode(command: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        match command {
            "filterload" => Ok(Message::FilterLoad(BloomFilter::from_filterload(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(GetBlocks::from_payload(payload)?)),
            "getdata" => Ok(Message::GetData(parse_inv_payload(payload)?)),
            "inv" => Ok(Message::Inv(parse_inv_payload(payload)?)),
            "notfound" => Ok(Message::NotFound(parse_inv_payload(payload)?)),
            "merkleblock" => Ok(Message::MerkleBlock(MerkleBlock::consensus_decode(payload)?)),
            "tx" => Ok(Message::Tx(Transaction::consensus_decode(payload)?)),
            _ => Err(DecodeError::InvalidData("unknown command")),
        }
    }
}
