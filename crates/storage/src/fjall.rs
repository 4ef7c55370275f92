//! Persistent backend: one fjall partition per [`Column`] inside a single
//! keyspace, so a [`WriteBatch`] spanning columns still commits atomically.

use std::path::Path;
use std::time::{Duration, Instant};

use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use spv_log::{log_debug, log_warn};

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

const SLOW_BATCH: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    pub cache_bytes: Option<u64>,
    pub journal_bytes: Option<u64>,
    pub memtable_bytes: Option<u32>,
    /// Sync the journal on every batch. Otherwise writes are buffered and
    /// synced on [`FjallStore::persist`] or drop.
    pub sync_writes: bool,
}

impl FjallOptions {
    fn config(&self, path: &Path) -> Config {
        let mut config = Config::new(path);
        if let Some(bytes) = self.cache_bytes {
            config = config.cache_size(bytes);
        }
        if let Some(bytes) = self.journal_bytes {
            config = config.max_journaling_size(bytes);
        }
        config
    }

    fn partition(&self) -> PartitionCreateOptions {
        match self.memtable_bytes {
            Some(bytes) => PartitionCreateOptions::default().max_memtable_size(bytes),
            None => PartitionCreateOptions::default(),
        }
    }

    fn durability(&self) -> PersistMode {
        if self.sync_writes {
            PersistMode::SyncAll
        } else {
            PersistMode::Buffer
        }
    }
}

pub struct FjallStore {
    keyspace: Keyspace,
    partitions: Vec<PartitionHandle>,
    durability: PersistMode,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, FjallOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let keyspace = options.config(path).open().map_err(backend)?;
        let partitions = Column::ALL
            .iter()
            .map(|column| {
                keyspace
                    .open_partition(column.as_str(), options.partition())
                    .map_err(backend)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log_debug!("fjall store open at {}", path.display());
        Ok(Self {
            keyspace,
            partitions,
            durability: options.durability(),
        })
    }

    /// Syncs buffered journal writes to disk.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.keyspace.persist(PersistMode::SyncAll).map_err(backend)
    }

    fn partition(&self, column: Column) -> Result<&PartitionHandle, StoreError> {
        self.partitions
            .get(column.index())
            .ok_or_else(|| StoreError::Backend(format!("no partition for {}", column.as_str())))
    }
}

impl Drop for FjallStore {
    fn drop(&mut self) {
        if let Err(err) = self.persist() {
            log_warn!("fjall store not synced on close: {err}");
        }
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .partition(column)?
            .get(key)
            .map_err(backend)?
            .map(|slice| slice.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.partition(column)?.insert(key, value).map_err(backend)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.partition(column)?.remove(key).map_err(backend)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.partition(column)?
            .prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(key, value)| (key.to_vec(), value.to_vec()))
                    .map_err(backend)
            })
            .collect()
    }

    /// One fjall batch shares a single sequence number, so a key touched
    /// twice would be ambiguous; only its final op is written.
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let ops = batch.coalesced();
        if ops.is_empty() {
            return Ok(());
        }

        let mut fjall_batch = Batch::with_capacity(self.keyspace.clone(), ops.len())
            .durability(Some(self.durability));
        for op in &ops {
            let partition = self.partition(op.column())?;
            match op {
                WriteOp::Put { key, value, .. } => {
                    fjall_batch.insert(partition, key.as_slice(), value.as_slice());
                }
                WriteOp::Delete { key, .. } => {
                    fjall_batch.remove(partition, key.as_slice());
                }
            }
        }

        let started = Instant::now();
        fjall_batch.commit().map_err(backend)?;
        let elapsed = started.elapsed();
        if elapsed >= SLOW_BATCH {
            log_warn!(
                "fjall batch of {} op(s) took {}ms",
                ops.len(),
                elapsed.as_millis()
            );
        }
        Ok(())
    }
}

fn backend(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
