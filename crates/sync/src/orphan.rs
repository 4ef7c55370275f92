//! Bounded buffer for blocks and transactions that arrived before they
//! could be placed.

use std::collections::HashMap;

use spv_primitives::{Hash256, MerkleBlock, Transaction};

use crate::peer::PeerId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrphanPayload {
    Block(MerkleBlock),
    Tx(Transaction),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrphanEntry {
    pub hash: Hash256,
    /// Previous block hash for blocks; transactions have no single parent.
    pub parent: Option<Hash256>,
    pub payload: OrphanPayload,
    pub origin: PeerId,
    /// Arrival time, seconds since the unix epoch.
    pub received_at: u64,
}

impl OrphanEntry {
    pub fn block(block: MerkleBlock, origin: PeerId, received_at: u64) -> Self {
        Self {
            hash: block.block_hash(),
            parent: Some(block.header.prev_block),
            payload: OrphanPayload::Block(block),
            origin,
            received_at,
        }
    }

    pub fn tx(tx: Transaction, origin: PeerId, received_at: u64) -> Self {
        Self {
            hash: tx.txid(),
            parent: None,
            payload: OrphanPayload::Tx(tx),
            origin,
            received_at,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.payload, OrphanPayload::Block(_))
    }
}

struct Slot {
    entry: OrphanEntry,
    seq: u64,
}

pub struct OrphanPool {
    entries: HashMap<Hash256, Slot>,
    children: HashMap<Hash256, Vec<Hash256>>,
    blocks: usize,
    txs: usize,
    max_blocks: usize,
    max_txs: usize,
    ttl_secs: u64,
    next_seq: u64,
    latest: u64,
}

impl OrphanPool {
    pub fn new(max_blocks: usize, max_txs: usize, ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            children: HashMap::new(),
            blocks: 0,
            txs: 0,
            max_blocks,
            max_txs,
            ttl_secs,
            next_seq: 0,
            latest: 0,
        }
    }

    /// Files an entry, replacing any previous entry with the same hash.
    /// Expired entries go first, then the oldest of the same kind while the
    /// kind's bound is exceeded.
    pub fn add(&mut self, entry: OrphanEntry) {
        self.latest = self.latest.max(entry.received_at);
        self.prune_expired();
        self.remove(&entry.hash);

        let is_block = entry.is_block();
        let limit = if is_block { self.max_blocks } else { self.max_txs };
        if limit == 0 {
            return;
        }
        while self.kind_count(is_block) >= limit {
            if !self.evict_oldest(is_block) {
                break;
            }
        }

        if let Some(parent) = entry.parent {
            let siblings = self.children.entry(parent).or_default();
            if !siblings.contains(&entry.hash) {
                siblings.push(entry.hash);
            }
        }
        if is_block {
            self.blocks += 1;
        } else {
            self.txs += 1;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(entry.hash, Slot { entry, seq });
    }

    /// Removes and returns the entry; unknown hashes yield `None`.
    pub fn promote(&mut self, hash: &Hash256) -> Option<OrphanEntry> {
        self.remove(hash)
    }

    /// Removes and returns every orphan whose parent is `parent`, oldest first.
    pub fn promote_children(&mut self, parent: &Hash256) -> Vec<OrphanEntry> {
        let Some(hashes) = self.children.remove(parent) else {
            return Vec::new();
        };
        let mut promoted: Vec<(u64, OrphanEntry)> = hashes
            .iter()
            .filter_map(|hash| {
                let slot = self.entries.remove(hash)?;
                self.uncount(&slot.entry);
                Some((slot.seq, slot.entry))
            })
            .collect();
        promoted.sort_by_key(|(seq, _)| *seq);
        promoted.into_iter().map(|(_, entry)| entry).collect()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }

    pub fn tx_count(&self) -> usize {
        self.txs
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.children.clear();
        self.blocks = 0;
        self.txs = 0;
    }

    fn kind_count(&self, is_block: bool) -> usize {
        if is_block {
            self.blocks
        } else {
            self.txs
        }
    }

    fn remove(&mut self, hash: &Hash256) -> Option<OrphanEntry> {
        let slot = self.entries.remove(hash)?;
        self.uncount(&slot.entry);
        if let Some(parent) = slot.entry.parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|sibling| sibling != hash);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        Some(slot.entry)
    }

    fn uncount(&mut self, entry: &OrphanEntry) {
        if entry.is_block() {
            self.blocks = self.blocks.saturating_sub(1);
        } else {
            self.txs = self.txs.saturating_sub(1);
        }
    }

    fn evict_oldest(&mut self, is_block: bool) -> bool {
        let oldest = self
            .entries
            .values()
            .filter(|slot| slot.entry.is_block() == is_block)
            .min_by_key(|slot| (slot.entry.received_at, slot.seq))
            .map(|slot| slot.entry.hash);
        let Some(hash) = oldest else {
            return false;
        };
        spv_log::log_debug!("evicting orphan {}", spv_primitives::hash_to_hex(&hash));
        self.remove(&hash).is_some()
    }

    fn prune_expired(&mut self) {
        let Some(cutoff) = self.latest.checked_sub(self.ttl_secs) else {
            return;
        };
        let expired: Vec<Hash256> = self
            .entries
            .values()
            .filter(|slot| slot.entry.received_at < cutoff)
            .map(|slot| slot.entry.hash)
            .collect();
        for hash in expired {
            self.remove(&hash);
        }
    }
}
