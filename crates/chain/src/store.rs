//! `ChainStore`: the persisted header chain plus the wallet's transactions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use spv_log::{log_debug, log_info, log_warn};
use spv_pow::validate_pow_header;
use spv_primitives::{hash_to_hex, BlockHeader, BloomFilter, Hash256, ProgramHash, Transaction};
use spv_storage::arbiters::ArbiterStore;
use spv_storage::{Column, KeyValueStore, StoreError, WriteBatch};
use spv_sync::{BlockData, Blockchain, ChainError, CommitBatch, CommitSummary};

use crate::address::AddressBook;
use crate::config::ChainConfig;

const TIP_KEY: &[u8] = b"tip";
const PROGRAM_HASH_LEN: usize = 21;

pub type BlockCallback = Box<dyn Fn(&BlockHeader, u32) + Send + Sync>;
pub type TxCallback = Box<dyn Fn(&Transaction, Option<u32>) + Send + Sync>;
pub type RollbackCallback = Box<dyn Fn(u32) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    block: Vec<BlockCallback>,
    tx: Vec<TxCallback>,
    rollback: Vec<RollbackCallback>,
}

/// A stored wallet transaction; `height` is `None` while unconfirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTx {
    pub tx: Transaction,
    pub height: Option<u32>,
}

struct ChainIndex {
    /// Main chain hashes by height, genesis first.
    main: Vec<Hash256>,
    headers: HashMap<Hash256, (u32, BlockHeader)>,
    txs_by_height: BTreeMap<u32, Vec<Hash256>>,
}

impl ChainIndex {
    fn tip_height(&self) -> u32 {
        u32::try_from(self.main.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    fn tip(&self) -> Result<&BlockHeader, ChainError> {
        self.main
            .last()
            .and_then(|hash| self.headers.get(hash))
            .map(|(_, header)| header)
            .ok_or_else(|| ChainError::Store(StoreError::Corrupt("empty chain index".into())))
    }

    fn height_of(&self, hash: &Hash256) -> Option<u32> {
        self.headers.get(hash).map(|(height, _)| *height)
    }
}

pub struct ChainStore<S> {
    store: Arc<S>,
    config: ChainConfig,
    index: RwLock<ChainIndex>,
    book: RwLock<AddressBook>,
    filter: RwLock<BloomFilter>,
    arbiters: ArbiterStore<Arc<S>>,
    listeners: RwLock<Listeners>,
}

impl<S: KeyValueStore> ChainStore<S> {
    /// Opens the chain, seeding it with `genesis` on first use. A store
    /// seeded with a different genesis is rejected.
    pub fn open(
        store: Arc<S>,
        genesis: BlockHeader,
        config: ChainConfig,
    ) -> Result<Self, ChainError> {
        let genesis_hash = genesis.hash();
        if store.get(Column::Meta, TIP_KEY)?.is_none() {
            let mut batch = WriteBatch::new();
            batch.put(Column::Header, genesis_hash, genesis.consensus_encode());
            batch.put(Column::HeightIndex, height_key(0), genesis_hash);
            batch.put(Column::Meta, TIP_KEY, genesis_hash);
            store.write_batch(&batch)?;
            log_info!("chain store seeded with genesis {}", hash_to_hex(&genesis_hash));
        }

        let index = load_index(store.as_ref())?;
        if index.main.first() != Some(&genesis_hash) {
            return Err(ChainError::Store(StoreError::Corrupt(
                "stored genesis does not match".into(),
            )));
        }
        let book = load_address_book(store.as_ref())?;
        let filter = book.build_filter(config.filter_fp_rate, config.filter_tweak);
        log_info!(
            "chain store open at height {} with {} watched address(es)",
            index.tip_height(),
            book.len()
        );

        Ok(Self {
            arbiters: ArbiterStore::new(Arc::clone(&store)),
            store,
            config,
            index: RwLock::new(index),
            book: RwLock::new(book),
            filter: RwLock::new(filter),
            listeners: RwLock::new(Listeners::default()),
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn arbiters(&self) -> &ArbiterStore<Arc<S>> {
        &self.arbiters
    }

    pub fn on_block_commit(&self, callback: impl Fn(&BlockHeader, u32) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.block.push(Box::new(callback));
        }
    }

    pub fn on_tx_commit(
        &self,
        callback: impl Fn(&Transaction, Option<u32>) + Send + Sync + 'static,
    ) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.tx.push(Box::new(callback));
        }
    }

    pub fn on_rollback(&self, callback: impl Fn(u32) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.rollback.push(Box::new(callback));
        }
    }

    /// Starts watching `address`. Returns `false` when it was already
    /// watched. The peer-side filter is only refreshed by
    /// [`Blockchain::reload_addr_filter`].
    pub fn add_address(&self, address: ProgramHash) -> Result<bool, ChainError> {
        let mut book = self.book.write().map_err(|_| ChainError::Poisoned)?;
        if book.contains(&address) {
            return Ok(false);
        }
        self.store.put(Column::Address, address.as_bytes(), &[])?;
        book.insert(address);
        log_debug!("watching address {address}");
        Ok(true)
    }

    pub fn addresses(&self) -> Result<Vec<ProgramHash>, ChainError> {
        let book = self.book.read().map_err(|_| ChainError::Poisoned)?;
        Ok(book.addresses().copied().collect())
    }

    pub fn header_at(&self, height: u32) -> Result<Option<BlockHeader>, ChainError> {
        let index = self.read_index()?;
        Ok(usize::try_from(height)
            .ok()
            .and_then(|height| index.main.get(height))
            .and_then(|hash| index.headers.get(hash))
            .map(|(_, header)| header.clone()))
    }

    pub fn transaction(&self, txid: &Hash256) -> Result<Option<StoredTx>, ChainError> {
        if let Some(raw) = self.store.get(Column::Txn, txid)? {
            let (height, tx) = decode_confirmed(&raw)?;
            return Ok(Some(StoredTx {
                tx,
                height: Some(height),
            }));
        }
        match self.store.get(Column::Unconfirmed, txid)? {
            Some(raw) => Ok(Some(StoredTx {
                tx: Transaction::consensus_decode(&raw)?,
                height: None,
            })),
            None => Ok(None),
        }
    }

    pub fn unconfirmed_transactions(&self) -> Result<Vec<Transaction>, ChainError> {
        let mut txs = Vec::new();
        for (_, raw) in self.store.scan_prefix(Column::Unconfirmed, &[])? {
            txs.push(Transaction::consensus_decode(&raw)?);
        }
        Ok(txs)
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, ChainIndex>, ChainError> {
        self.index.read().map_err(|_| ChainError::Poisoned)
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, ChainIndex>, ChainError> {
        self.index.write().map_err(|_| ChainError::Poisoned)
    }

    fn notify(
        &self,
        rolled_back: &[(u32, Hash256)],
        blocks: &[(u32, &BlockHeader)],
        txs: &[(u32, &Transaction)],
    ) {
        let Ok(listeners) = self.listeners.read() else {
            return;
        };
        for (height, _) in rolled_back {
            for callback in &listeners.rollback {
                callback(*height);
            }
        }
        for (height, header) in blocks {
            for callback in &listeners.block {
                callback(header, *height);
            }
        }
        for (height, tx) in txs {
            for callback in &listeners.tx {
                callback(tx, Some(*height));
            }
        }
    }
}

impl<S: KeyValueStore> Blockchain for ChainStore<S> {
    fn is_known_block(&self, hash: &Hash256) -> Result<bool, ChainError> {
        Ok(self.read_index()?.headers.contains_key(hash))
    }

    fn chain_tip(&self) -> Result<BlockHeader, ChainError> {
        Ok(self.read_index()?.tip()?.clone())
    }

    fn height(&self) -> Result<u32, ChainError> {
        Ok(self.read_index()?.tip_height())
    }

    fn check_proof_of_work(&self, header: &BlockHeader) -> Result<(), ChainError> {
        Ok(validate_pow_header(header, self.config.pow_limit_bits)?)
    }

    fn commit_unconfirmed_txn(&self, tx: &Transaction) -> Result<bool, ChainError> {
        let txid = tx.txid();
        {
            let mut book = self.book.write().map_err(|_| ChainError::Poisoned)?;
            if !book.is_relevant(tx) {
                log_debug!("filter false positive {}", hash_to_hex(&txid));
                return Ok(true);
            }
            if self.store.get(Column::Txn, &txid)?.is_none() {
                self.store
                    .put(Column::Unconfirmed, &txid, &tx.consensus_encode())?;
            }
            book.track_outputs(tx);
        }
        if let Ok(listeners) = self.listeners.read() {
            for callback in &listeners.tx {
                callback(tx, None);
            }
        }
        Ok(false)
    }

    /// Writes every block of `batch` that is not stored yet in one atomic
    /// store batch. A batch forking below the tip rolls the abandoned
    /// branch back in the same write; its wallet transactions go back to
    /// the unconfirmed pool.
    fn commit_data(&self, batch: &CommitBatch) -> Result<CommitSummary, ChainError> {
        let mut index = self.write_index()?;
        let mut book = self.book.write().map_err(|_| ChainError::Poisoned)?;

        let fresh: Vec<&BlockData> = batch
            .blocks
            .iter()
            .filter(|block| !index.headers.contains_key(&block.header.hash()))
            .collect();
        let Some(first) = fresh.first() else {
            return Ok(CommitSummary {
                committed: Vec::new(),
                false_positives: 0,
                height: index.tip_height(),
            });
        };
        let fork_height = index
            .height_of(&first.header.prev_block)
            .ok_or_else(|| ChainError::Disconnected(first.header.hash()))?;

        let mut prev = first.header.prev_block;
        let mut expected = fork_height;
        for block in &fresh {
            let hash = block.header.hash();
            expected += 1;
            if block.header.prev_block != prev || block.header.height != expected {
                return Err(ChainError::NonContiguous(hash));
            }
            prev = hash;
        }

        // A key is touched at most once per batch.
        let new_tip = fork_height.saturating_add(u32::try_from(fresh.len()).unwrap_or(u32::MAX));
        let mut writes = WriteBatch::new();
        let mut rolled_back = Vec::new();
        let mut demoted: BTreeMap<Hash256, Transaction> = BTreeMap::new();
        for height in (fork_height + 1..=index.tip_height()).rev() {
            let Some(hash) = usize::try_from(height)
                .ok()
                .and_then(|height| index.main.get(height).copied())
            else {
                continue;
            };
            writes.delete(Column::Header, hash);
            if height > new_tip {
                writes.delete(Column::HeightIndex, height_key(height));
            }
            for txid in index.txs_by_height.get(&height).into_iter().flatten() {
                if let Some(raw) = self.store.get(Column::Txn, txid)? {
                    let (_, tx) = decode_confirmed(&raw)?;
                    demoted.insert(*txid, tx);
                }
            }
            rolled_back.push((height, hash));
        }
        if !rolled_back.is_empty() {
            log_warn!(
                "rolling back {} block(s) to fork point at height {fork_height}",
                rolled_back.len()
            );
        }

        let mut next_book = book.clone();
        let mut false_positives = 0u32;
        let mut committed = Vec::with_capacity(fresh.len());
        let mut blocks = Vec::with_capacity(fresh.len());
        let mut confirmed = Vec::new();
        for (height, block) in (fork_height + 1..).zip(fresh.iter()) {
            let hash = block.header.hash();
            writes.put(Column::Header, hash, block.header.consensus_encode());
            writes.put(Column::HeightIndex, height_key(height), hash);
            for tx in &block.transactions {
                if !next_book.is_relevant(tx) {
                    false_positives += 1;
                    continue;
                }
                next_book.track_outputs(tx);
                let txid = tx.txid();
                let mut value = height.to_le_bytes().to_vec();
                value.extend_from_slice(&tx.consensus_encode());
                writes.put(Column::Txn, txid, value);
                if demoted.remove(&txid).is_none() {
                    writes.delete(Column::Unconfirmed, txid);
                }
                confirmed.push((height, txid, tx));
            }
            committed.push(hash);
            blocks.push((height, &block.header));
        }
        for (txid, tx) in &demoted {
            writes.delete(Column::Txn, *txid);
            writes.put(Column::Unconfirmed, *txid, tx.consensus_encode());
        }
        writes.put(Column::Meta, TIP_KEY, prev);
        self.store.write_batch(&writes)?;

        for (_, hash) in &rolled_back {
            index.headers.remove(hash);
        }
        index.main.truncate(fork_height as usize + 1);
        let _abandoned = index.txs_by_height.split_off(&(fork_height + 1));
        for (height, header) in &blocks {
            let hash = header.hash();
            index.main.push(hash);
            index.headers.insert(hash, (*height, (*header).clone()));
        }
        for (height, txid, _) in &confirmed {
            index.txs_by_height.entry(*height).or_default().push(*txid);
        }
        *book = next_book;
        let height = index.tip_height();
        drop(book);
        drop(index);

        log_info!(
            "committed {} block(s) up to height {height}, {} wallet tx(s), {false_positives} false positive(s)",
            committed.len(),
            confirmed.len()
        );
        let txs: Vec<(u32, &Transaction)> = confirmed
            .iter()
            .map(|(height, _, tx)| (*height, *tx))
            .collect();
        self.notify(&rolled_back, &blocks, &txs);

        Ok(CommitSummary {
            committed,
            false_positives,
            height,
        })
    }

    fn block_locator(&self) -> Result<Vec<Hash256>, ChainError> {
        let index = self.read_index()?;
        Ok(locator_heights(index.tip_height())
            .into_iter()
            .filter_map(|height| usize::try_from(height).ok())
            .filter_map(|height| index.main.get(height).copied())
            .collect())
    }

    fn bloom_filter(&self) -> Result<BloomFilter, ChainError> {
        let filter = self.filter.read().map_err(|_| ChainError::Poisoned)?;
        Ok(filter.clone())
    }

    fn reload_addr_filter(&self) -> Result<(), ChainError> {
        let rebuilt = {
            let book = self.book.read().map_err(|_| ChainError::Poisoned)?;
            book.build_filter(self.config.filter_fp_rate, self.config.filter_tweak)
        };
        let mut filter = self.filter.write().map_err(|_| ChainError::Poisoned)?;
        *filter = rebuilt;
        log_debug!("address filter reloaded ({} bytes)", filter.size_bytes());
        Ok(())
    }
}

/// Heights of a block locator: the tip and its nine predecessors, then
/// exponentially growing steps, always ending at genesis.
pub fn locator_heights(tip: u32) -> Vec<u32> {
    let mut heights = Vec::new();
    let mut height = tip;
    let mut step = 1u32;
    loop {
        heights.push(height);
        if height == 0 {
            break;
        }
        if heights.len() >= 10 {
            step = step.saturating_mul(2);
        }
        height = height.saturating_sub(step);
    }
    heights
}

fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

fn decode_hash(raw: &[u8]) -> Result<Hash256, StoreError> {
    Hash256::try_from(raw).map_err(|_| StoreError::Corrupt("invalid hash length".into()))
}

fn decode_confirmed(raw: &[u8]) -> Result<(u32, Transaction), ChainError> {
    if raw.len() < 4 {
        return Err(ChainError::Store(StoreError::Corrupt(
            "truncated transaction record".into(),
        )));
    }
    let (height, body) = raw.split_at(4);
    let height = u32::from_le_bytes([height[0], height[1], height[2], height[3]]);
    Ok((height, Transaction::consensus_decode(body)?))
}

fn load_index<S: KeyValueStore>(store: &S) -> Result<ChainIndex, ChainError> {
    let mut index = ChainIndex {
        main: Vec::new(),
        headers: HashMap::new(),
        txs_by_height: BTreeMap::new(),
    };
    for (expected, (key, value)) in (0u32..).zip(store.scan_prefix(Column::HeightIndex, &[])?) {
        if key.as_slice() != height_key(expected) {
            return Err(ChainError::Store(StoreError::Corrupt(format!(
                "height index gap at {expected}"
            ))));
        }
        let hash = decode_hash(&value)?;
        let raw = store.get(Column::Header, &hash)?.ok_or_else(|| {
            StoreError::Corrupt(format!("missing header {}", hash_to_hex(&hash)))
        })?;
        let header = BlockHeader::consensus_decode(&raw)?;
        index.main.push(hash);
        index.headers.insert(hash, (expected, header));
    }

    let tip = store
        .get(Column::Meta, TIP_KEY)?
        .map(|raw| decode_hash(&raw))
        .transpose()?;
    if tip.is_none() || tip.as_ref() != index.main.last() {
        return Err(ChainError::Store(StoreError::Corrupt(
            "tip does not match height index".into(),
        )));
    }

    for (key, value) in store.scan_prefix(Column::Txn, &[])? {
        let txid = decode_hash(&key)?;
        let (height, _) = decode_confirmed(&value)?;
        index.txs_by_height.entry(height).or_default().push(txid);
    }
    Ok(index)
}

fn load_address_book<S: KeyValueStore>(store: &S) -> Result<AddressBook, ChainError> {
    let mut book = AddressBook::new();
    for (key, _) in store.scan_prefix(Column::Address, &[])? {
        let bytes = <[u8; PROGRAM_HASH_LEN]>::try_from(key.as_slice())
            .map_err(|_| StoreError::Corrupt("invalid program hash length".into()))?;
        book.insert(ProgramHash(bytes));
    }
    for (_, value) in store.scan_prefix(Column::Txn, &[])? {
        let (_, tx) = decode_confirmed(&value)?;
        book.track_outputs(&tx);
    }
    for (_, value) in store.scan_prefix(Column::Unconfirmed, &[])? {
        book.track_outputs(&Transaction::consensus_decode(&value)?);
    }
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_steps_double_after_ten() {
        assert_eq!(locator_heights(0), vec![0]);
        assert_eq!(locator_heights(3), vec![3, 2, 1, 0]);
        assert_eq!(
            locator_heights(20),
            vec![20, 19, 18, 17, 16, 15, 14, 13, 12, 11, 9, 5, 0]
        );
        let long = locator_heights(1_000_000);
        assert_eq!(long.last(), Some(&0));
        assert!(long.len() < 40);
    }

    #[test]
    fn confirmed_record_needs_height_prefix() {
        assert!(matches!(
            decode_confirmed(&[1, 2]),
            Err(ChainError::Store(StoreError::Corrupt(_)))
        ));
    }
}
