use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// In-process backend; what tests and ephemeral wallets run on.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreMap>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreMap>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn column_range<'a>(
        map: &'a MemoryStoreMap,
        column: Column,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
        map.range((column, prefix.to_vec())..)
            .take_while(move |((entry_column, key), _)| {
                *entry_column == column && key.starts_with(prefix)
            })
            .map(|((_, key), value)| (key, value))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.read()?;
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        guard.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        guard.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.read()?;
        let rows = Self::column_range(&guard, column, prefix)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(rows)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        for op in batch.iter() {
            let entry = (op.column(), op.key().to_vec());
            match op {
                WriteOp::Put { value, .. } => {
                    guard.insert(entry, value.as_slice().to_vec());
                }
                WriteOp::Delete { .. } => {
                    guard.remove(&entry);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stays_inside_column() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"tip", b"1").expect("put");
        store.put(Column::Meta, b"tip:2", b"2").expect("put");
        store.put(Column::Meta, b"tiq", b"3").expect("put");
        store.put(Column::Txn, b"tip", b"4").expect("put");

        let rows = store.scan_prefix(Column::Meta, b"tip").expect("scan");
        assert_eq!(
            rows,
            vec![
                (b"tip".to_vec(), b"1".to_vec()),
                (b"tip:2".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Address, b"a", b"1");
        batch.delete(Column::Address, b"a");
        batch.put(Column::Address, b"b", b"2");
        store.write_batch(&batch).expect("batch");

        assert_eq!(store.get(Column::Address, b"a").expect("get"), None);
        assert_eq!(
            store.get(Column::Address, b"b").expect("get"),
            Some(b"2".to_vec())
        );
        assert_eq!(store.len(), 1);
    }
}
