use std::sync::Arc;

use spv_storage::arbiters::{ArbiterSet, ArbiterStore, PublicKey};
use spv_storage::memory::MemoryStore;
use spv_storage::{Column, KeyValueStore, StoreError, WriteBatch};

fn key(tag: u8) -> PublicKey {
    let mut key = [tag; 33];
    key[0] = 0x03;
    key
}

fn sample(tags: &[u8], crc: usize) -> ArbiterSet {
    let keys: Vec<PublicKey> = tags.iter().copied().map(key).collect();
    ArbiterSet::new(keys[..crc].to_vec(), keys[crc..].to_vec())
}

#[test]
fn put_and_get_by_height() {
    let arbiters = ArbiterStore::new(MemoryStore::new());
    assert_eq!(arbiters.current().expect("empty"), None);

    let first = sample(&[1, 2, 3], 1);
    let second = sample(&[4, 5], 2);
    arbiters.put(100, &first).expect("put 100");
    arbiters.put(120, &second).expect("put 120");

    assert_eq!(arbiters.position().expect("position"), 120);
    assert_eq!(arbiters.current().expect("current"), Some(second));
    assert_eq!(arbiters.get_by_height(100).expect("get"), Some(first));
    assert_eq!(arbiters.get_by_height(110).expect("get"), None);
}

#[test]
fn repeated_set_is_stored_once() {
    let kv = Arc::new(MemoryStore::new());
    let arbiters = ArbiterStore::new(Arc::clone(&kv));

    let set = sample(&[7, 8, 9], 1);
    let reordered = ArbiterSet::new(set.crc.clone(), set.normal.iter().rev().copied().collect());
    arbiters.put(10, &set).expect("put 10");
    arbiters.put(11, &sample(&[1], 0)).expect("put 11");
    arbiters.put(12, &reordered).expect("put 12");

    let raw = kv
        .get(Column::Arbiters, &12u32.to_le_bytes())
        .expect("get")
        .expect("present");
    assert_eq!(raw, 10u32.to_le_bytes().to_vec());
    assert_eq!(arbiters.get_by_height(12).expect("resolve"), Some(set));
    assert_eq!(kv.scan_prefix(Column::ArbiterDigest, &[]).expect("scan").len(), 2);
}

#[test]
fn position_only_moves_forward() {
    let arbiters = ArbiterStore::new(MemoryStore::new());
    arbiters.put(50, &sample(&[1], 1)).expect("put");

    for height in [49, 50] {
        let err = arbiters.put(height, &sample(&[2], 1)).expect_err("stale height");
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
    assert_eq!(arbiters.position().expect("position"), 50);
    assert_eq!(arbiters.current().expect("current"), Some(sample(&[1], 1)));
}

#[test]
fn rollback_discards_staged_snapshots() {
    let kv = Arc::new(MemoryStore::new());
    let arbiters = ArbiterStore::new(Arc::clone(&kv));
    arbiters.stage_put(7, &sample(&[1, 2], 1)).expect("stage");
    arbiters.rollback().expect("rollback");
    arbiters.commit().expect("commit nothing");

    assert!(kv.is_empty());
    assert_eq!(arbiters.position().expect("position"), 0);

    // The rolled-back digest must not turn a later put into a dangling reference.
    arbiters.put(8, &sample(&[1, 2], 1)).expect("put");
    assert_eq!(
        arbiters.get_by_height(8).expect("get"),
        Some(sample(&[1, 2], 1))
    );
}

#[test]
fn caller_batch_commits_with_other_writes() {
    let kv = Arc::new(MemoryStore::new());
    let arbiters = ArbiterStore::new(Arc::clone(&kv));

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"tip", b"h");
    arbiters.batch_put(3, &sample(&[5], 0), &mut batch).expect("batch put");
    assert_eq!(arbiters.position().expect("unchanged"), 0);

    arbiters.commit_batch(&batch).expect("commit batch");
    assert_eq!(arbiters.position().expect("position"), 3);
    assert_eq!(kv.get(Column::Meta, b"tip").expect("get"), Some(b"h".to_vec()));

    let mut discarded = WriteBatch::new();
    arbiters.batch_put(4, &sample(&[6], 0), &mut discarded).expect("batch put");
    arbiters.rollback_batch(&mut discarded).expect("rollback batch");
    assert!(discarded.is_empty());
    assert_eq!(arbiters.position().expect("position"), 3);
}

#[test]
fn clear_removes_everything() {
    let kv = Arc::new(MemoryStore::new());
    kv.put(Column::Meta, b"unrelated", b"keep").expect("put");
    let arbiters = ArbiterStore::new(Arc::clone(&kv));
    arbiters.put(1, &sample(&[1], 1)).expect("put");
    arbiters.put(2, &sample(&[1], 1)).expect("put");

    arbiters.clear().expect("clear");
    assert_eq!(arbiters.position().expect("position"), 0);
    assert_eq!(arbiters.current().expect("current"), None);
    assert_eq!(kv.len(), 1);

    arbiters.put(1, &sample(&[1], 1)).expect("put after clear");
    assert_eq!(arbiters.get_by_height(1).expect("get"), Some(sample(&[1], 1)));
}
