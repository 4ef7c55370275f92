//! Filtered blocks: a header plus the partial merkle tree proving which
//! transactions matched the peer-side bloom filter.

use crate::block::BlockHeader;
use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{sha256d, Hash256, ZERO_HASH};

/// Upper bound on the transaction count a proof may claim.
pub const MAX_MERKLE_TRANSACTIONS: u32 = 100_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialMerkleTree {
    pub n_transactions: u32,
    pub bits: Vec<bool>,
    pub hashes: Vec<Hash256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: BlockHeader,
    pub tree: PartialMerkleTree,
}

impl MerkleBlock {
    /// Builds a proof for `txids` where `matches` flags the relevant ones.
    /// The header's merkle root is overwritten with the computed root.
    pub fn build(
        mut header: BlockHeader,
        txids: &[Hash256],
        matches: &[bool],
    ) -> Result<Self, DecodeError> {
        header.merkle_root = merkle_root(txids);
        let tree = PartialMerkleTree::from_txids(txids, matches)?;
        Ok(Self { header, tree })
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Transaction ids the proof commits to, in block order. Fails when the
    /// tree is malformed or its root disagrees with the header.
    pub fn matched_txids(&self) -> Result<Vec<Hash256>, DecodeError> {
        let (root, matched) = self.tree.extract_matches()?;
        if root != self.header.merkle_root {
            return Err(DecodeError::InvalidData("merkle root mismatch"));
        }
        Ok(matched)
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for MerkleBlock {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        Encodable::consensus_encode(&self.header, encoder);
        self.tree.consensus_encode(encoder);
    }
}

impl Decodable for MerkleBlock {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = <BlockHeader as Decodable>::consensus_decode(decoder)?;
        let tree = PartialMerkleTree::consensus_decode(decoder)?;
        Ok(Self { header, tree })
    }
}

impl PartialMerkleTree {
    pub fn from_txids(txids: &[Hash256], matches: &[bool]) -> Result<Self, DecodeError> {
        if txids.len() != matches.len() {
            return Err(DecodeError::InvalidData("txids/matches length mismatch"));
        }
        if txids.is_empty() {
            return Err(DecodeError::InvalidData("empty merkle tree"));
        }
        let n_transactions = u32::try_from(txids.len()).map_err(|_| DecodeError::SizeTooLarge)?;
        if n_transactions > MAX_MERKLE_TRANSACTIONS {
            return Err(DecodeError::SizeTooLarge);
        }
        let mut tree = Self {
            n_transactions,
            bits: Vec::new(),
            hashes: Vec::new(),
        };
        let height = tree_height(n_transactions);
        tree.build(height, 0, txids, matches);
        // Flags travel as whole bytes; keep the padding so decoding is exact.
        tree.bits.resize(tree.bits.len().div_ceil(8) * 8, false);
        Ok(tree)
    }

    /// Walks the tree and returns the computed root with the matched leaves.
    pub fn extract_matches(&self) -> Result<(Hash256, Vec<Hash256>), DecodeError> {
        if self.n_transactions == 0 {
            return Err(DecodeError::InvalidData("empty merkle tree"));
        }
        if self.n_transactions > MAX_MERKLE_TRANSACTIONS {
            return Err(DecodeError::SizeTooLarge);
        }
        if self.hashes.len() > self.n_transactions as usize {
            return Err(DecodeError::InvalidData("more hashes than transactions"));
        }
        if self.bits.len() < self.hashes.len() {
            return Err(DecodeError::InvalidData("fewer flag bits than hashes"));
        }

        let mut walk = Extraction {
            tree: self,
            bits_used: 0,
            hashes_used: 0,
            matched: Vec::new(),
        };
        let root = walk.visit(tree_height(self.n_transactions), 0)?;

        if walk.bits_used.div_ceil(8) != self.bits.len().div_ceil(8) {
            return Err(DecodeError::InvalidData("unused flag bits"));
        }
        if walk.hashes_used != self.hashes.len() {
            return Err(DecodeError::InvalidData("unused hashes"));
        }
        Ok((root, walk.matched))
    }

    fn build(&mut self, height: u32, pos: u32, txids: &[Hash256], matches: &[bool]) {
        let start = (pos as usize) << height;
        let end = ((pos as usize + 1) << height).min(self.n_transactions as usize);
        let parent_of_match = matches[start..end].iter().any(|matched| *matched);
        self.bits.push(parent_of_match);

        if height == 0 || !parent_of_match {
            let hash = subtree_hash(self.n_transactions, height, pos, txids);
            self.hashes.push(hash);
            return;
        }

        self.build(height - 1, pos * 2, txids, matches);
        if pos * 2 + 1 < tree_width(self.n_transactions, height - 1) {
            self.build(height - 1, pos * 2 + 1, txids, matches);
        }
    }
}

struct Extraction<'a> {
    tree: &'a PartialMerkleTree,
    bits_used: usize,
    hashes_used: usize,
    matched: Vec<Hash256>,
}

impl Extraction<'_> {
    fn visit(&mut self, height: u32, pos: u32) -> Result<Hash256, DecodeError> {
        let parent_of_match = *self
            .tree
            .bits
            .get(self.bits_used)
            .ok_or(DecodeError::InvalidData("merkle flag bits exhausted"))?;
        self.bits_used += 1;

        if height == 0 || !parent_of_match {
            let hash = *self
                .tree
                .hashes
                .get(self.hashes_used)
                .ok_or(DecodeError::InvalidData("merkle hashes exhausted"))?;
            self.hashes_used += 1;
            if height == 0 && parent_of_match {
                self.matched.push(hash);
            }
            return Ok(hash);
        }

        let left = self.visit(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.tree.n_transactions, height - 1) {
            let right = self.visit(height - 1, pos * 2 + 1)?;
            // Identical siblings allow the CVE-2012-2459 duplication trick.
            if right == left {
                return Err(DecodeError::InvalidData("duplicate merkle siblings"));
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }
}

impl Encodable for PartialMerkleTree {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.n_transactions);
        encoder.write_varint(self.hashes.len() as u64);
        for hash in &self.hashes {
            encoder.write_hash(hash);
        }
        let mut flags = vec![0u8; self.bits.len().div_ceil(8)];
        for (idx, bit) in self.bits.iter().enumerate() {
            if *bit {
                flags[idx / 8] |= 1 << (idx % 8);
            }
        }
        encoder.write_var_bytes(&flags);
    }
}

impl Decodable for PartialMerkleTree {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let n_transactions = decoder.read_u32_le()?;
        if n_transactions > MAX_MERKLE_TRANSACTIONS {
            return Err(DecodeError::InvalidData("too many transactions in merkle tree"));
        }
        let hash_count =
            decoder.read_count(n_transactions as usize, "too many hashes in merkle tree")?;
        let mut hashes = Vec::with_capacity(hash_count);
        for _ in 0..hash_count {
            hashes.push(decoder.read_hash()?);
        }

        let flags = decoder.read_var_bytes()?;
        if flags.len() > (n_transactions as usize * 2).div_ceil(8) {
            return Err(DecodeError::InvalidData("too many flag bytes in merkle tree"));
        }
        let bits = flags
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
            .collect();

        Ok(Self {
            n_transactions,
            bits,
            hashes,
        })
    }
}

/// Plain merkle root over `txids`, duplicating the last node of odd layers.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return ZERO_HASH;
    }
    let mut layer = txids.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    layer[0]
}

fn subtree_hash(n_transactions: u32, height: u32, pos: u32, txids: &[Hash256]) -> Hash256 {
    if height == 0 {
        return txids[pos as usize];
    }
    let left = subtree_hash(n_transactions, height - 1, pos * 2, txids);
    let right = if pos * 2 + 1 < tree_width(n_transactions, height - 1) {
        subtree_hash(n_transactions, height - 1, pos * 2 + 1, txids)
    } else {
        left
    };
    hash_pair(&left, &right)
}

fn tree_height(n_transactions: u32) -> u32 {
    let mut height = 0;
    while tree_width(n_transactions, height) > 1 {
        height += 1;
    }
    height
}

fn tree_width(n_transactions: u32, height: u32) -> u32 {
    ((u64::from(n_transactions) + (1u64 << height) - 1) >> height) as u32
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txids(count: u8) -> Vec<Hash256> {
        (0..count)
            .map(|i| {
                let mut hash = ZERO_HASH;
                hash[0] = i;
                hash[31] = 0x5a;
                hash
            })
            .collect()
    }

    #[test]
    fn extract_returns_matched_leaves_in_order() {
        let ids = txids(7);
        let matches = [false, true, false, true, true, false, false];
        let tree = PartialMerkleTree::from_txids(&ids, &matches).expect("build");
        let (root, matched) = tree.extract_matches().expect("extract");
        assert_eq!(root, merkle_root(&ids));
        assert_eq!(matched, vec![ids[1], ids[3], ids[4]]);

        let decoded: PartialMerkleTree = decode(&encode(&tree)).expect("decode");
        assert_eq!(decoded.extract_matches().expect("extract"), (root, matched));
    }

    #[test]
    fn built_flags_survive_the_wire() {
        let ids = txids(3);
        let tree = PartialMerkleTree::from_txids(&ids, &[false, false, true]).expect("build");
        assert_eq!(tree.bits.len() % 8, 0);
        let decoded: PartialMerkleTree = decode(&encode(&tree)).expect("decode");
        assert_eq!(decoded, tree);
    }

    #[test]
    fn single_transaction_block() {
        let ids = txids(1);
        let tree = PartialMerkleTree::from_txids(&ids, &[true]).expect("build");
        let (root, matched) = tree.extract_matches().expect("extract");
        assert_eq!(root, ids[0]);
        assert_eq!(matched, ids);
    }

    #[test]
    fn no_matches_still_proves_root() {
        let ids = txids(5);
        let tree = PartialMerkleTree::from_txids(&ids, &[false; 5]).expect("build");
        assert_eq!(tree.hashes.len(), 1);
        let (root, matched) = tree.extract_matches().expect("extract");
        assert_eq!(root, merkle_root(&ids));
        assert!(matched.is_empty());
    }

    #[test]
    fn tampered_hash_changes_root() {
        let ids = txids(4);
        let header = BlockHeader {
            version: 0,
            prev_block: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 0,
            bits: 0x207f_ffff,
            nonce: 0,
            height: 1,
        };
        let mut block =
            MerkleBlock::build(header, &ids, &[true, false, false, false]).expect("build");
        assert_eq!(block.matched_txids().expect("valid"), vec![ids[0]]);

        block.tree.hashes[0][5] ^= 0xff;
        assert_eq!(
            block.matched_txids(),
            Err(DecodeError::InvalidData("merkle root mismatch"))
        );
    }

    #[test]
    fn truncated_flags_are_rejected() {
        let ids = txids(6);
        let mut tree =
            PartialMerkleTree::from_txids(&ids, &[true, false, true, false, false, true])
                .expect("build");
        tree.bits.truncate(2);
        assert!(tree.extract_matches().is_err());
    }
}
