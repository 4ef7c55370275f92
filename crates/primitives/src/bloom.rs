//! BIP37 bloom filters, loaded onto peers with `filterload` so they only
//! relay the transactions and merkle proofs relevant to the wallet.

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::Hash256;
use crate::outpoint::OutPoint;
use crate::transaction::Transaction;

pub const MAX_FILTER_BYTES: usize = 36_000;
pub const MAX_HASH_FUNCS: u32 = 50;

const LN2: f64 = std::f64::consts::LN_2;
const LN2_SQUARED: f64 = LN2 * LN2;
const SEED_STEP: u32 = 0xfba4_c795;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BloomUpdate {
    None = 0,
    All = 1,
    P2PubkeyOnly = 2,
}

impl BloomUpdate {
    fn from_u8(raw: u8) -> Result<Self, DecodeError> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::All),
            2 => Ok(Self::P2PubkeyOnly),
            _ => Err(DecodeError::InvalidData("unknown bloom update flag")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: BloomUpdate,
}

impl BloomFilter {
    /// Sizes a filter for `elements` entries at false-positive rate
    /// `fp_rate`, with a random tweak.
    pub fn new(elements: usize, fp_rate: f64, flags: BloomUpdate) -> Self {
        Self::with_tweak(elements, fp_rate, rand::random(), flags)
    }

    pub fn with_tweak(elements: usize, fp_rate: f64, tweak: u32, flags: BloomUpdate) -> Self {
        let elements = elements.max(1) as f64;
        let fp_rate = fp_rate.clamp(1e-9, 1.0);
        let bits = (-1.0 / LN2_SQUARED * elements * fp_rate.ln())
            .min((MAX_FILTER_BYTES * 8) as f64);
        let bytes = ((bits / 8.0) as usize).clamp(1, MAX_FILTER_BYTES);
        let hash_funcs = ((bytes * 8) as f64 / elements * LN2) as u32;
        Self {
            data: vec![0; bytes],
            hash_funcs: hash_funcs.clamp(1, MAX_HASH_FUNCS),
            tweak,
            flags,
        }
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn flags(&self) -> BloomUpdate {
        self.flags
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn insert(&mut self, element: &[u8]) {
        let bit_len = self.data.len() * 8;
        for n in 0..self.hash_funcs {
            let bit = self.bit_index(n, element, bit_len);
            self.data[bit >> 3] |= 1 << (bit & 7);
        }
    }

    pub fn insert_outpoint(&mut self, outpoint: &OutPoint) {
        self.insert(&encode(outpoint));
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        let bit_len = self.data.len() * 8;
        (0..self.hash_funcs).all(|n| {
            let bit = self.bit_index(n, element, bit_len);
            self.data[bit >> 3] & (1 << (bit & 7)) != 0
        })
    }

    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.contains(&encode(outpoint))
    }

    /// Peer-side relevance test. Matching outputs are added back into the
    /// filter when the update flag asks for it, so spends of them match too.
    pub fn matches_tx(&mut self, tx: &Transaction) -> bool {
        let txid: Hash256 = tx.txid();
        let mut matched = self.contains(&txid);

        for (index, output) in tx.outputs.iter().enumerate() {
            if !self.contains(output.program_hash.as_bytes()) {
                continue;
            }
            matched = true;
            if self.flags == BloomUpdate::All {
                if let Ok(index) = u16::try_from(index) {
                    self.insert_outpoint(&OutPoint { txid, index });
                }
            }
        }
        if matched {
            return true;
        }

        tx.inputs
            .iter()
            .any(|input| self.contains_outpoint(&input.previous))
    }

    pub fn to_filterload(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_filterload(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    fn bit_index(&self, n: u32, element: &[u8], bit_len: usize) -> usize {
        let seed = n.wrapping_mul(SEED_STEP).wrapping_add(self.tweak);
        murmur3(seed, element) as usize % bit_len
    }
}

impl Encodable for BloomFilter {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.data);
        encoder.write_u32_le(self.hash_funcs);
        encoder.write_u32_le(self.tweak);
        encoder.write_u8(self.flags as u8);
    }
}

impl Decodable for BloomFilter {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let data = decoder.read_var_bytes()?;
        if data.is_empty() || data.len() > MAX_FILTER_BYTES {
            return Err(DecodeError::InvalidData("bloom filter size out of range"));
        }
        let hash_funcs = decoder.read_u32_le()?;
        if hash_funcs == 0 || hash_funcs > MAX_HASH_FUNCS {
            return Err(DecodeError::InvalidData("bloom hash function count out of range"));
        }
        let tweak = decoder.read_u32_le()?;
        let flags = BloomUpdate::from_u8(decoder.read_u8()?)?;
        Ok(Self {
            data,
            hash_funcs,
            tweak,
            flags,
        })
    }
}

/// MurmurHash3 x86_32.
fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (shift, byte) in tail.iter().enumerate() {
            k1 ^= u32::from(*byte) << (8 * shift);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{ProgramHash, TxIn, TxOut};

    #[test]
    fn murmur3_reference_vectors() {
        assert_eq!(murmur3(0, &[]), 0);
        assert_eq!(murmur3(0xfba4_c795, &[]), 0x6a39_6f08);
        assert_eq!(murmur3(0, &[0x00]), 0x514e_28b7);
        assert_eq!(murmur3(0, &[0x21, 0x43, 0x65, 0x87]), 0xf55b_516b);
        assert_eq!(murmur3(0x5082_edee, &[0x21, 0x43, 0x65, 0x87]), 0x2362_f9de);
    }

    #[test]
    fn inserted_elements_are_found() {
        let mut filter = BloomFilter::with_tweak(3, 0.01, 7, BloomUpdate::All);
        filter.insert(b"alpha");
        filter.insert(b"beta");
        assert!(filter.contains(b"alpha"));
        assert!(filter.contains(b"beta"));

        let decoded = BloomFilter::from_filterload(&filter.to_filterload()).expect("decode");
        assert_eq!(decoded, filter);
        assert!(decoded.contains(b"alpha"));
    }

    #[test]
    fn sizing_is_bounded() {
        let filter = BloomFilter::with_tweak(10_000_000, 0.000_001, 0, BloomUpdate::None);
        assert_eq!(filter.size_bytes(), MAX_FILTER_BYTES);
        assert!(filter.hash_funcs() >= 1 && filter.hash_funcs() <= MAX_HASH_FUNCS);
    }

    #[test]
    fn matching_output_adds_its_outpoint() {
        let watched = ProgramHash([0x21; 21]);
        let mut filter = BloomFilter::with_tweak(4, 0.0001, 1, BloomUpdate::All);
        filter.insert(watched.as_bytes());

        let funding = Transaction {
            version: 9,
            tx_type: 2,
            payload: Vec::new(),
            inputs: Vec::new(),
            outputs: vec![TxOut {
                value: 50,
                output_lock: 0,
                program_hash: watched,
            }],
            lock_time: 0,
        };
        assert!(filter.matches_tx(&funding));

        let spend = Transaction {
            version: 9,
            tx_type: 2,
            payload: Vec::new(),
            inputs: vec![TxIn {
                previous: OutPoint {
                    txid: funding.txid(),
                    index: 0,
                },
                sequence: u32::MAX,
            }],
            outputs: Vec::new(),
            lock_time: 0,
        };
        assert!(filter.matches_tx(&spend));
    }
}
