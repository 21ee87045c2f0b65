/// Batch write helper tests against a counting table
///
/// Run with: cargo test --test batch_tests
mod common;

use common::ProbeTable;
use std::sync::atomic::Ordering;
use std::time::Duration;
use table_identity::table::UpdateMode;
use table_identity::{BatchOperationHelper, ETag, IdentityError, TableClient, TableEntity};

#[tokio::test]
async fn test_mixed_partitions_are_split() -> anyhow::Result<()> {
    let table = ProbeTable::new("batches");
    table.create_if_not_exists().await?;

    let mut batch = BatchOperationHelper::new(table.clone());
    for i in 0..150 {
        batch.add_entity(TableEntity::new("left", format!("{:03}", i)));
    }
    for i in 0..30 {
        batch.upsert_entity(
            TableEntity::new("right", format!("{:03}", i)),
            UpdateMode::Replace,
        );
    }
    assert_eq!(batch.group_count(), 3);
    batch.submit().await?;

    assert_eq!(table.transactions.load(Ordering::SeqCst), 3);
    assert_eq!(table.partition_rows("left").await.len(), 150);
    assert_eq!(table.partition_rows("right").await.len(), 30);
    Ok(())
}

#[tokio::test]
async fn test_delete_batch_reports_missing_rows() -> anyhow::Result<()> {
    let table = ProbeTable::new("deletes");
    table.create_if_not_exists().await?;
    table.add_entity(TableEntity::new("p", "present")).await?;

    let mut batch = BatchOperationHelper::new(table.clone());
    batch.delete_entity("p", "present", ETag::all());
    batch.delete_entity("q", "absent", ETag::all());

    let err = batch.submit().await.unwrap_err();
    match err {
        IdentityError::BatchFailed {
            failed,
            total,
            source,
        } => {
            assert_eq!((failed, total), (1, 2));
            assert!(source.is_not_found());
        }
        other => panic!("unexpected error: {}", other),
    }
    // the other partition's group still went through
    assert!(table.partition_rows("p").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_smaller_group_size() -> anyhow::Result<()> {
    let table = ProbeTable::new("small");
    table.create_if_not_exists().await?;

    let mut batch = BatchOperationHelper::with_group_size(table.clone(), 10);
    for i in 0..25 {
        batch.add_entity(TableEntity::new("p", format!("{:02}", i)));
    }
    batch.submit().await?;
    assert_eq!(table.transactions.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_repeated_row_keeps_write_order() -> anyhow::Result<()> {
    let table = ProbeTable::new("ordered");
    table.create_if_not_exists().await?;
    table.delay_first_transaction(Duration::from_millis(30));

    let mut batch = BatchOperationHelper::new(table.clone());
    batch.upsert_entity(TableEntity::new("a", "1").with("V", 1i64), UpdateMode::Replace);
    batch.add_entity(TableEntity::new("b", "1"));
    batch.upsert_entity(TableEntity::new("a", "1").with("V", 2i64), UpdateMode::Replace);
    batch.submit().await?;

    assert_eq!(table.transactions.load(Ordering::SeqCst), 3);
    let row = table.get_entity("a", "1", None).await?;
    assert_eq!(row.get("V").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(table.partition_rows("b").await.len(), 1);
    Ok(())
}
