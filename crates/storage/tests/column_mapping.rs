use spv_storage::{Column, WriteBatch, WriteOp};

#[test]
fn columns_index_their_partitions() {
    for (idx, column) in Column::ALL.iter().copied().enumerate() {
        assert_eq!(column.index(), idx, "index of {column:?}");
    }
    let mut names: Vec<&str> = Column::ALL.iter().map(|column| column.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), Column::ALL.len());
}

#[test]
fn coalesced_batch_keeps_last_op_per_key() {
    let mut batch = WriteBatch::new();
    batch.delete(Column::HeightIndex, 2u32.to_be_bytes());
    batch.put(Column::Txn, [7u8; 32], b"confirmed".to_vec());
    batch.put(Column::HeightIndex, 2u32.to_be_bytes(), [1u8; 32]);
    batch.put(Column::Unconfirmed, [7u8; 32], b"pending".to_vec());
    batch.delete(Column::Txn, [7u8; 32]);

    let ops = batch.coalesced();
    assert_eq!(ops.len(), 3);
    assert!(matches!(
        ops[0],
        WriteOp::Put {
            column: Column::HeightIndex,
            ..
        }
    ));
    assert_eq!(ops[1].column(), Column::Unconfirmed);
    assert!(matches!(ops[2], WriteOp::Delete { column: Column::Txn, .. }));
    assert_eq!(ops[2].key(), &[7u8; 32]);
    assert_eq!(batch.len(), 5);
}
