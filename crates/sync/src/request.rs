//! What the sync peer currently owes us.

use std::collections::HashMap;

use spv_primitives::{BlockHeader, Hash256, Transaction};

use crate::chain::{BlockData, CommitBatch};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Block,
    Tx,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestStatus {
    Pending,
    Received,
    Committed,
}

#[derive(Clone, Debug)]
struct RequestEntry {
    kind: RequestKind,
    status: RequestStatus,
    false_positive: bool,
}

struct ReceivedBlock {
    header: BlockHeader,
    matched: Vec<Hash256>,
}

/// Outstanding block and transaction requests of one sync session.
#[derive(Default)]
pub struct RequestWindow {
    entries: HashMap<Hash256, RequestEntry>,
    block_order: Vec<Hash256>,
    blocks: HashMap<Hash256, ReceivedBlock>,
    txs: HashMap<Hash256, Transaction>,
}

impl RequestWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_block(&mut self, hash: Hash256) -> bool {
        self.drop_committed();
        if self.entries.contains_key(&hash) {
            return false;
        }
        self.entries.insert(hash, RequestEntry::pending(RequestKind::Block));
        self.block_order.push(hash);
        true
    }

    pub fn request_tx(&mut self, txid: Hash256) -> bool {
        self.drop_committed();
        if self.entries.contains_key(&txid) {
            return false;
        }
        self.entries.insert(txid, RequestEntry::pending(RequestKind::Tx));
        true
    }

    /// Whether `hash` is expected: requested and not yet committed.
    pub fn is_requested(&self, hash: &Hash256) -> bool {
        self.entries
            .get(hash)
            .is_some_and(|entry| entry.status != RequestStatus::Committed)
    }

    pub fn status(&self, hash: &Hash256) -> Option<RequestStatus> {
        self.entries.get(hash).map(|entry| entry.status)
    }

    pub fn kind(&self, hash: &Hash256) -> Option<RequestKind> {
        self.entries.get(hash).map(|entry| entry.kind)
    }

    /// Records a requested block and registers its matched transactions.
    /// Returns the matched txids still outstanding, in block order.
    pub fn block_received(
        &mut self,
        hash: Hash256,
        header: BlockHeader,
        matched: Vec<Hash256>,
    ) -> Vec<Hash256> {
        let Some(entry) = self.entries.get_mut(&hash) else {
            return Vec::new();
        };
        if entry.kind != RequestKind::Block || entry.status == RequestStatus::Committed {
            return Vec::new();
        }
        entry.status = RequestStatus::Received;

        let mut outstanding = Vec::new();
        for txid in &matched {
            self.request_tx(*txid);
            if self.status(txid) == Some(RequestStatus::Pending) {
                outstanding.push(*txid);
            }
        }
        self.blocks.insert(hash, ReceivedBlock { header, matched });
        outstanding
    }

    /// Records a requested transaction; unrequested ones are ignored.
    pub fn tx_received(&mut self, tx: Transaction) -> bool {
        let txid = tx.txid();
        let Some(entry) = self.entries.get_mut(&txid) else {
            return false;
        };
        if entry.kind != RequestKind::Tx || entry.status == RequestStatus::Committed {
            return false;
        }
        entry.status = RequestStatus::Received;
        self.txs.insert(txid, tx);
        true
    }

    /// Keeps a transaction already classified as a false positive out of
    /// the commit batch.
    pub fn mark_false_positive(&mut self, txid: &Hash256) {
        if let Some(entry) = self.entries.get_mut(txid) {
            entry.false_positive = true;
        }
    }

    /// Every requested item has arrived.
    pub fn is_finished(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .values()
                .all(|entry| entry.status == RequestStatus::Received)
    }

    /// Builds the commit batch, blocks in request order. `None` until the
    /// window is finished.
    pub fn to_batch(&self) -> Option<CommitBatch> {
        if !self.is_finished() {
            return None;
        }
        let mut blocks = Vec::with_capacity(self.block_order.len());
        for hash in &self.block_order {
            let received = self.blocks.get(hash)?;
            let transactions = received
                .matched
                .iter()
                .filter(|txid| {
                    self.entries
                        .get(*txid)
                        .is_some_and(|entry| !entry.false_positive)
                })
                .filter_map(|txid| self.txs.get(txid).cloned())
                .collect();
            blocks.push(BlockData {
                header: received.header.clone(),
                transactions,
            });
        }
        Some(CommitBatch { blocks })
    }

    pub fn mark_committed(&mut self) {
        for entry in self.entries.values_mut() {
            entry.status = RequestStatus::Committed;
        }
    }

    /// A fully committed window is forgotten once the next request starts.
    fn drop_committed(&mut self) {
        if !self.entries.is_empty()
            && self
                .entries
                .values()
                .all(|entry| entry.status == RequestStatus::Committed)
        {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.block_order.clear();
        self.blocks.clear();
        self.txs.clear();
    }

    /// Entries not yet committed.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status != RequestStatus::Committed)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status == RequestStatus::Pending)
            .count()
    }

    pub fn block_hashes(&self) -> &[Hash256] {
        &self.block_order
    }
}

impl RequestEntry {
    fn pending(kind: RequestKind) -> Self {
        Self {
            kind,
            status: RequestStatus::Pending,
            false_positive: false,
        }
    }
}
