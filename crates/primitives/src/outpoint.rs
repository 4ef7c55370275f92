//! Reference to a previous transaction output.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{Hash256, ZERO_HASH};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u16,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            txid: ZERO_HASH,
            index: u16::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == ZERO_HASH && self.index == u16::MAX
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.txid);
        encoder.write_u16_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash()?;
        let index = decoder.read_u16_le()?;
        Ok(Self { txid, index })
    }
}
