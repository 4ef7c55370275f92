//! Column-oriented key-value storage used by the chain store and the
//! arbiter snapshot store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod arbiters;
pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Backend(String),
    Corrupt(String),
    InvalidInput(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
            StoreError::Corrupt(message) => write!(f, "corrupt record: {message}"),
            StoreError::InvalidInput(message) => write!(f, "invalid input: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Logical key spaces. Each backend keeps them apart: fjall as separate
/// partitions, the memory store as part of the map key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// Block hash -> encoded header.
    Header = 0,
    /// Big-endian height -> main-chain block hash.
    HeightIndex = 1,
    /// Txid -> little-endian height followed by the encoded transaction.
    Txn = 2,
    /// Txid -> encoded transaction not yet seen in a block.
    Unconfirmed = 3,
    /// Watched program hash -> empty.
    Address = 4,
    Meta = 5,
    Arbiters = 6,
    ArbiterDigest = 7,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::Header,
        Column::HeightIndex,
        Column::Txn,
        Column::Unconfirmed,
        Column::Address,
        Column::Meta,
        Column::Arbiters,
        Column::ArbiterDigest,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Header => "header",
            Column::HeightIndex => "height_index",
            Column::Txn => "txn",
            Column::Unconfirmed => "unconfirmed",
            Column::Address => "address",
            Column::Meta => "meta",
            Column::Arbiters => "arbiters",
            Column::ArbiterDigest => "arbiter_digest",
        }
    }
}

macro_rules! inline_bytes {
    ($name:ident, $inline:literal) => {
        #[derive(Clone, Debug, Eq, PartialEq, Hash)]
        pub struct $name(SmallVec<[u8; $inline]>);

        impl $name {
            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.as_slice()
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(value: Vec<u8>) -> Self {
                Self(SmallVec::from_vec(value))
            }
        }

        impl From<&[u8]> for $name {
            fn from(value: &[u8]) -> Self {
                Self(SmallVec::from_slice(value))
            }
        }

        impl<const N: usize> From<[u8; N]> for $name {
            fn from(value: [u8; N]) -> Self {
                Self(SmallVec::from_slice(&value))
            }
        }

        impl<const N: usize> From<&[u8; N]> for $name {
            fn from(value: &[u8; N]) -> Self {
                Self(SmallVec::from_slice(value))
            }
        }
    };
}

// Hashes and program hashes stay inline as keys; an encoded header fits
// inline as a value.
inline_bytes!(WriteKey, 32);
inline_bytes!(WriteValue, 96);

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: WriteKey,
        value: WriteValue,
    },
    Delete {
        column: Column,
        key: WriteKey,
    },
}

impl WriteOp {
    pub fn column(&self) -> Column {
        match self {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => *column,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key.as_slice(),
        }
    }
}

/// Ordered list of writes applied atomically by [`KeyValueStore::write_batch`].
/// When a key is written more than once the last op wins.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<WriteKey>, value: impl Into<WriteValue>) {
        self.ops.push(WriteOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<WriteKey>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: key.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// The final op for every distinct key, in batch order. Backends that
    /// stamp a whole batch with one sequence number apply this instead of
    /// the raw list.
    pub fn coalesced(&self) -> Vec<&WriteOp> {
        let mut last: HashMap<(Column, &[u8]), usize> = HashMap::with_capacity(self.ops.len());
        for (position, op) in self.ops.iter().enumerate() {
            last.insert((op.column(), op.key()), position);
        }
        self.ops
            .iter()
            .enumerate()
            .filter(|(position, op)| last.get(&(op.column(), op.key())) == Some(position))
            .map(|(_, op)| op)
            .collect()
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;
    /// Every entry of `column` whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    /// Applies every op or none of them.
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        (**self).put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        (**self).delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        (**self).scan_prefix(column, prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        (**self).write_batch(batch)
    }
}
