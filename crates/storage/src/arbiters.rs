//! Arbiter set snapshots keyed by height.
//!
//! Each height maps either to a full snapshot (`[crc_count][33-byte keys..]`)
//! or, when the same set was already stored, to the 4-byte height of that
//! earlier snapshot. A digest index over the sorted keys finds duplicates.
//! The highest stored height is the current position; heights only move
//! forward until [`ArbiterStore::clear`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use crate::{Column, KeyValueStore, StoreError, WriteBatch};

pub const PUBLIC_KEY_LEN: usize = 33;

const POSITION_KEY: &[u8] = b"arbiter_position";
const REFERENCE_LEN: usize = 4;

pub type PublicKey = [u8; PUBLIC_KEY_LEN];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArbiterSet {
    pub crc: Vec<PublicKey>,
    pub normal: Vec<PublicKey>,
}

impl ArbiterSet {
    pub fn new(crc: Vec<PublicKey>, normal: Vec<PublicKey>) -> Self {
        Self { crc, normal }
    }

    /// The crc count is stored in one byte.
    fn crc_count(&self) -> Result<u8, StoreError> {
        u8::try_from(self.crc.len())
            .map_err(|_| StoreError::InvalidInput("too many crc arbiters".to_string()))
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let crc_len = self.crc_count()?;
        let mut out = Vec::with_capacity(1 + (self.crc.len() + self.normal.len()) * PUBLIC_KEY_LEN);
        out.push(crc_len);
        for key in self.crc.iter().chain(self.normal.iter()) {
            out.extend_from_slice(key);
        }
        Ok(out)
    }

    /// Order-insensitive fingerprint; the crc count stays part of it.
    fn digest(&self) -> Result<[u8; 32], StoreError> {
        let mut keys: Vec<&PublicKey> = self.crc.iter().chain(self.normal.iter()).collect();
        keys.sort();
        let mut hasher = Sha256::new();
        hasher.update([self.crc_count()?]);
        for key in keys {
            hasher.update(key);
        }
        Ok(hasher.finalize().into())
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (crc_len, keys) = bytes
            .split_first()
            .ok_or_else(|| StoreError::Corrupt("empty arbiter snapshot".to_string()))?;
        if keys.len() % PUBLIC_KEY_LEN != 0 {
            return Err(StoreError::Corrupt(format!(
                "arbiter snapshot length {} is not a multiple of {PUBLIC_KEY_LEN}",
                keys.len()
            )));
        }
        let mut set = ArbiterSet::default();
        for (idx, chunk) in keys.chunks_exact(PUBLIC_KEY_LEN).enumerate() {
            let mut key = [0u8; PUBLIC_KEY_LEN];
            key.copy_from_slice(chunk);
            if idx < usize::from(*crc_len) {
                set.crc.push(key);
            } else {
                set.normal.push(key);
            }
        }
        Ok(set)
    }
}

#[derive(Default)]
struct Staged {
    position: Option<u32>,
    digests: HashMap<[u8; 32], u32>,
}

#[derive(Default)]
struct ArbiterState {
    digests: HashMap<[u8; 32], u32>,
    staged: Staged,
    pending: WriteBatch,
}

pub struct ArbiterStore<S> {
    store: S,
    state: Mutex<ArbiterState>,
}

impl<S: KeyValueStore> ArbiterStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: Mutex::new(ArbiterState::default()),
        }
    }

    /// Stores the set at `height` and writes it through immediately.
    pub fn put(&self, height: u32, set: &ArbiterSet) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let mut batch = std::mem::take(&mut state.pending);
        let staged = self.stage(&mut state, height, set, &mut batch);
        state.pending = batch;
        staged?;
        self.flush_pending(&mut state)
    }

    /// Stages the set into the store's own pending batch; see [`Self::commit`].
    pub fn stage_put(&self, height: u32, set: &ArbiterSet) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let mut batch = std::mem::take(&mut state.pending);
        let staged = self.stage(&mut state, height, set, &mut batch);
        state.pending = batch;
        staged
    }

    /// Stages the set into a caller-owned batch, so it can commit together
    /// with other writes through [`Self::commit_batch`].
    pub fn batch_put(
        &self,
        height: u32,
        set: &ArbiterSet,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        self.stage(&mut state, height, set, batch)
    }

    pub fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        self.flush_pending(&mut state)
    }

    pub fn rollback(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.pending.clear();
        state.staged = Staged::default();
        Ok(())
    }

    pub fn commit_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        self.store.write_batch(batch)?;
        let staged = std::mem::take(&mut state.staged);
        state.digests.extend(staged.digests);
        Ok(())
    }

    pub fn rollback_batch(&self, batch: &mut WriteBatch) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        batch.clear();
        state.staged = Staged::default();
        Ok(())
    }

    /// Set at the current position, if any height was stored.
    pub fn current(&self) -> Result<Option<ArbiterSet>, StoreError> {
        let _state = self.lock()?;
        match self.position()? {
            0 => Ok(None),
            height => self.read_at(height),
        }
    }

    pub fn get_by_height(&self, height: u32) -> Result<Option<ArbiterSet>, StoreError> {
        let _state = self.lock()?;
        self.read_at(height)
    }

    /// Highest committed height, or zero when empty.
    pub fn position(&self) -> Result<u32, StoreError> {
        match self.store.get(Column::Meta, POSITION_KEY)? {
            Some(raw) => decode_height(&raw),
            None => Ok(0),
        }
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let mut batch = WriteBatch::new();
        for column in [Column::Arbiters, Column::ArbiterDigest] {
            for (key, _) in self.store.scan_prefix(column, &[])? {
                batch.delete(column, key);
            }
        }
        batch.delete(Column::Meta, POSITION_KEY);
        self.store.write_batch(&batch)?;
        *state = ArbiterState::default();
        spv_log::log_info!("arbiter store cleared");
        Ok(())
    }

    fn stage(
        &self,
        state: &mut ArbiterState,
        height: u32,
        set: &ArbiterSet,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        let position = match state.staged.position {
            Some(position) => position,
            None => self.position()?,
        };
        if height <= position {
            return Err(StoreError::InvalidInput(format!(
                "arbiter height {height} must be above position {position}"
            )));
        }
        let value = set.encode()?;
        let digest = set.digest()?;

        let known = match state
            .staged
            .digests
            .get(&digest)
            .or_else(|| state.digests.get(&digest))
        {
            Some(height) => Some(*height),
            None => match self.store.get(Column::ArbiterDigest, &digest)? {
                Some(raw) => {
                    let existing = decode_height(&raw)?;
                    state.digests.insert(digest, existing);
                    Some(existing)
                }
                None => None,
            },
        };

        match known {
            Some(reference) => {
                batch.put(Column::Arbiters, height.to_le_bytes(), reference.to_le_bytes());
            }
            None => {
                batch.put(Column::Arbiters, height.to_le_bytes(), value);
                batch.put(Column::ArbiterDigest, digest, height.to_le_bytes());
                state.staged.digests.insert(digest, height);
            }
        }
        batch.put(Column::Meta, POSITION_KEY, height.to_le_bytes());
        state.staged.position = Some(height);
        Ok(())
    }

    fn flush_pending(&self, state: &mut ArbiterState) -> Result<(), StoreError> {
        self.store.write_batch(&state.pending)?;
        state.pending.clear();
        let staged = std::mem::take(&mut state.staged);
        state.digests.extend(staged.digests);
        Ok(())
    }

    fn read_at(&self, height: u32) -> Result<Option<ArbiterSet>, StoreError> {
        let Some(raw) = self.store.get(Column::Arbiters, &height.to_le_bytes())? else {
            return Ok(None);
        };
        if raw.len() != REFERENCE_LEN {
            return ArbiterSet::decode(&raw).map(Some);
        }
        let reference = decode_height(&raw)?;
        match self.store.get(Column::Arbiters, &reference.to_le_bytes())? {
            Some(snapshot) if snapshot.len() != REFERENCE_LEN => {
                ArbiterSet::decode(&snapshot).map(Some)
            }
            Some(_) => Err(StoreError::Corrupt(format!(
                "arbiter reference at {height} points to another reference"
            ))),
            None => Err(StoreError::Corrupt(format!(
                "arbiter reference at {height} points to missing height {reference}"
            ))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ArbiterState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("arbiter store lock poisoned".to_string()))
    }
}

fn decode_height(raw: &[u8]) -> Result<u32, StoreError> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("height record of {} bytes", raw.len())))?;
    Ok(u32::from_le_bytes(bytes))
}
