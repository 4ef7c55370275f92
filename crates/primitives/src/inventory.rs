//! Inventory vectors and the `inv`/`getdata`/`notfound`/`getblocks` payloads.

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{Hash256, ZERO_HASH};

pub const MAX_INV_ENTRIES: usize = 50_000;
pub const MAX_LOCATOR_HASHES: usize = 500;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum InvType {
    Tx,
    Block,
    FilteredBlock,
}

impl InvType {
    pub fn code(self) -> u32 {
        match self {
            Self::Tx => 1,
            Self::Block => 2,
            Self::FilteredBlock => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Tx),
            2 => Some(Self::Block),
            3 => Some(Self::FilteredBlock),
            _ => None,
        }
    }

    /// Blocks are announced as `MSG_BLOCK` and fetched as filtered blocks.
    pub fn is_block(self) -> bool {
        matches!(self, Self::Block | Self::FilteredBlock)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct InventoryVector {
    pub inv_type: InvType,
    pub hash: Hash256,
}

impl InventoryVector {
    pub fn new(inv_type: InvType, hash: Hash256) -> Self {
        Self { inv_type, hash }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self::new(InvType::Tx, hash)
    }

    pub fn block(hash: Hash256) -> Self {
        Self::new(InvType::Block, hash)
    }

    pub fn filtered_block(hash: Hash256) -> Self {
        Self::new(InvType::FilteredBlock, hash)
    }
}

impl Encodable for InventoryVector {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.inv_type.code());
        encoder.write_hash(&self.hash);
    }
}

impl Decodable for InventoryVector {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let inv_type = InvType::from_code(decoder.read_u32_le()?)
            .ok_or(DecodeError::InvalidData("unknown inventory type"))?;
        let hash = decoder.read_hash()?;
        Ok(Self { inv_type, hash })
    }
}

/// Shared body of `inv`, `getdata` and `notfound`.
pub fn build_inv_payload(entries: &[InventoryVector]) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(1 + entries.len() * 36);
    encoder.write_varint(entries.len() as u64);
    for entry in entries {
        entry.consensus_encode(&mut encoder);
    }
    encoder.into_inner()
}

pub fn parse_inv_payload(payload: &[u8]) -> Result<Vec<InventoryVector>, DecodeError> {
    let mut decoder = Decoder::new(payload);
    let count = decoder.read_count(MAX_INV_ENTRIES, "inv count too large")?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(InventoryVector::consensus_decode(&mut decoder)?);
    }
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(entries)
}

/// `getblocks` request: a locator and an optional stop hash (zero = no limit).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GetBlocks {
    pub locator: Vec<Hash256>,
    pub stop: Hash256,
}

impl GetBlocks {
    pub fn new(locator: Vec<Hash256>) -> Self {
        Self {
            locator,
            stop: ZERO_HASH,
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for GetBlocks {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.locator.len() as u64);
        for hash in &self.locator {
            encoder.write_hash(hash);
        }
        encoder.write_hash(&self.stop);
    }
}

impl Decodable for GetBlocks {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let count = decoder.read_count(MAX_LOCATOR_HASHES, "locator too long")?;
        let mut locator = Vec::with_capacity(count);
        for _ in 0..count {
            locator.push(decoder.read_hash()?);
        }
        let stop = decoder.read_hash()?;
        Ok(Self { locator, stop })
    }
}
