//! Transactions as seen by the light client.
//!
//! Only the parts the wallet needs to decide relevance are modelled: spent
//! outpoints and the program hash each output pays to. Type-specific payloads
//! are carried as opaque bytes.

use std::fmt;

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{hash160, sha256d, Hash256};
use crate::outpoint::OutPoint;

const MAX_TX_INPUTS: usize = 10_000;
const MAX_TX_OUTPUTS: usize = 10_000;

/// Prefix byte for standard single-signature program hashes.
pub const PREFIX_STANDARD: u8 = 0x21;

/// Address payload: a one byte type prefix followed by a hash160.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProgramHash(pub [u8; 21]);

impl ProgramHash {
    pub fn from_redeem_script(prefix: u8, script: &[u8]) -> Self {
        let mut out = [0u8; 21];
        out[0] = prefix;
        out[1..].copy_from_slice(&hash160(script));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub previous: OutPoint,
    pub sequence: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub output_lock: u32,
    pub program_hash: ProgramHash,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: u8,
    pub tx_type: u8,
    pub payload: Vec<u8>,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    pub fn pays_to(&self, program_hash: &ProgramHash) -> bool {
        self.outputs
            .iter()
            .any(|output| &output.program_hash == program_hash)
    }

    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|input| &input.previous == outpoint)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.version);
        encoder.write_u8(self.tx_type);
        encoder.write_var_bytes(&self.payload);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous.consensus_encode(encoder);
            encoder.write_u32_le(input.sequence);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            encoder.write_i64_le(output.value);
            encoder.write_u32_le(output.output_lock);
            encoder.write_bytes(&output.program_hash.0);
        }
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u8()?;
        let tx_type = decoder.read_u8()?;
        let payload = decoder.read_var_bytes()?;

        let input_count = decoder.read_count(MAX_TX_INPUTS, "too many transaction inputs")?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let previous = OutPoint::consensus_decode(decoder)?;
            let sequence = decoder.read_u32_le()?;
            inputs.push(TxIn { previous, sequence });
        }

        let output_count = decoder.read_count(MAX_TX_OUTPUTS, "too many transaction outputs")?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = decoder.read_i64_le()?;
            let output_lock = decoder.read_u32_le()?;
            let program_hash = ProgramHash(decoder.read_fixed::<21>()?);
            outputs.push(TxOut {
                value,
                output_lock,
                program_hash,
            });
        }

        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            tx_type,
            payload,
            inputs,
            outputs,
            lock_time,
        })
    }
}
