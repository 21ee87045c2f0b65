use super::client::{
    ContinuationToken, MAX_BATCH_OPERATIONS, MAX_PAGE_SIZE, Page, TableClient, TableQuery,
    TableService, TransactionAction, UpdateMode,
};
use super::entity::{ETag, TableEntity};
use crate::core::{StoreError, StoreResult};
use crate::keys::MAX_KEY_LENGTH;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

type RowMap = BTreeMap<(String, String), TableEntity>;

/// In-process table service.
///
/// Each named table lives behind its own lock; handles returned by
/// [`TableService::table`] share state, so two handles to the same name see
/// the same rows.
#[derive(Default)]
pub struct InMemoryTableService {
    tables: Mutex<HashMap<String, Arc<InMemoryTable>>>,
}

impl InMemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of tables that have been created.
    pub async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let handles: Vec<Arc<InMemoryTable>> = self.tables.lock()?.values().cloned().collect();
        let mut names = Vec::new();
        for handle in handles {
            if handle.rows.read().await.is_some() {
                names.push(handle.name.clone());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl TableService for InMemoryTableService {
    fn table(&self, name: &str) -> Arc<dyn TableClient> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryTable::new(name)))
            .clone()
    }
}

/// One in-memory table. Rows are kept ordered by `(partition, row)`.
pub struct InMemoryTable {
    name: String,
    rows: RwLock<Option<RowMap>>,
    version: AtomicU64,
}

impl InMemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Number of rows currently stored.
    pub async fn row_count(&self) -> usize {
        self.rows.read().await.as_ref().map_or(0, BTreeMap::len)
    }

    fn next_etag(&self) -> ETag {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        ETag::new(format!("W/\"{}\"", version))
    }

    fn not_found(&self, partition_key: &str, row_key: &str) -> StoreError {
        StoreError::NotFound {
            table: self.name.clone(),
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }

    fn exists(&self, partition_key: &str, row_key: &str) -> StoreError {
        StoreError::EntityExists {
            table: self.name.clone(),
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }

    fn missing_table(&self) -> StoreError {
        StoreError::TableNotFound(self.name.clone())
    }

    /// Stamps a fresh tag and timestamp and stores the row.
    fn store(&self, rows: &mut RowMap, mut entity: TableEntity, mode: UpdateMode) -> ETag {
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if mode == UpdateMode::Merge
            && let Some(existing) = rows.get(&key)
        {
            let mut merged = existing.properties.clone();
            merged.extend(std::mem::take(&mut entity.properties));
            entity.properties = merged;
        }
        let etag = self.next_etag();
        entity.etag = etag.clone();
        entity.timestamp = Some(Utc::now());
        rows.insert(key, entity);
        etag
    }

    fn check_precondition(
        &self,
        rows: &RowMap,
        partition_key: &str,
        row_key: &str,
        if_match: &ETag,
    ) -> StoreResult<()> {
        let key = (partition_key.to_string(), row_key.to_string());
        let current = rows
            .get(&key)
            .ok_or_else(|| self.not_found(partition_key, row_key))?;
        if !if_match.admits(&current.etag) {
            return Err(StoreError::PreconditionFailed(format!(
                "ETag {} does not match {} for ({}, {})",
                if_match, current.etag, partition_key, row_key
            )));
        }
        Ok(())
    }

    fn check_action(&self, rows: &RowMap, action: &TransactionAction) -> StoreResult<()> {
        match action {
            TransactionAction::Add(entity) => {
                validate_keys(&entity.partition_key, &entity.row_key)?;
                if rows.contains_key(&(entity.partition_key.clone(), entity.row_key.clone())) {
                    return Err(self.exists(&entity.partition_key, &entity.row_key));
                }
                Ok(())
            }
            TransactionAction::Upsert(entity, _) => {
                validate_keys(&entity.partition_key, &entity.row_key)
            }
            TransactionAction::Update(entity, if_match, _) => {
                self.check_precondition(rows, &entity.partition_key, &entity.row_key, if_match)
            }
            TransactionAction::Delete {
                partition_key,
                row_key,
                if_match,
            } => self.check_precondition(rows, partition_key, row_key, if_match),
        }
    }

    fn apply_action(&self, rows: &mut RowMap, action: TransactionAction) {
        match action {
            TransactionAction::Add(entity) => {
                self.store(rows, entity, UpdateMode::Replace);
            }
            TransactionAction::Upsert(entity, mode)
            | TransactionAction::Update(entity, _, mode) => {
                self.store(rows, entity, mode);
            }
            TransactionAction::Delete {
                partition_key,
                row_key,
                ..
            } => {
                rows.remove(&(partition_key, row_key));
            }
        }
    }
}

fn validate_keys(partition_key: &str, row_key: &str) -> StoreResult<()> {
    for key in [partition_key, row_key] {
        if key.chars().count() > MAX_KEY_LENGTH {
            return Err(StoreError::InvalidKey(format!(
                "key exceeds {} characters",
                MAX_KEY_LENGTH
            )));
        }
        if let Some(bad) = key
            .chars()
            .find(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control())
        {
            return Err(StoreError::InvalidKey(format!(
                "key '{}' contains disallowed character {:?}",
                key, bad
            )));
        }
    }
    Ok(())
}

fn validate_batch(actions: &[TransactionAction]) -> StoreResult<()> {
    let Some(first) = actions.first() else {
        return Err(StoreError::InvalidBatch("batch is empty".to_string()));
    };
    if actions.len() > MAX_BATCH_OPERATIONS {
        return Err(StoreError::InvalidBatch(format!(
            "batch holds {} actions, limit is {}",
            actions.len(),
            MAX_BATCH_OPERATIONS
        )));
    }
    let partition = first.partition_key();
    let mut seen = HashSet::new();
    for action in actions {
        if action.partition_key() != partition {
            return Err(StoreError::InvalidBatch(format!(
                "batch mixes partitions '{}' and '{}'",
                partition,
                action.partition_key()
            )));
        }
        if !seen.insert(action.key().1) {
            return Err(StoreError::InvalidBatch(format!(
                "row '{}' appears twice in one batch",
                action.key().1
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl TableClient for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.is_none() {
            *rows = Some(BTreeMap::new());
        }
        Ok(())
    }

    async fn get_entity(
        &self,
        partition_key: &str,
        row_key: &str,
        select: Option<&[String]>,
    ) -> StoreResult<TableEntity> {
        let guard = self.rows.read().await;
        let rows = guard.as_ref().ok_or_else(|| self.missing_table())?;
        let mut entity = rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
            .ok_or_else(|| self.not_found(partition_key, row_key))?;
        if let Some(columns) = select {
            entity.project(columns);
        }
        Ok(entity)
    }

    async fn add_entity(&self, entity: TableEntity) -> StoreResult<ETag> {
        let mut guard = self.rows.write().await;
        let rows = guard.as_mut().ok_or_else(|| self.missing_table())?;
        validate_keys(&entity.partition_key, &entity.row_key)?;
        if rows.contains_key(&(entity.partition_key.clone(), entity.row_key.clone())) {
            return Err(self.exists(&entity.partition_key, &entity.row_key));
        }
        Ok(self.store(rows, entity, UpdateMode::Replace))
    }

    async fn upsert_entity(&self, entity: TableEntity, mode: UpdateMode) -> StoreResult<ETag> {
        validate_keys(&entity.partition_key, &entity.row_key)?;
        let mut guard = self.rows.write().await;
        let rows = guard.as_mut().ok_or_else(|| self.missing_table())?;
        Ok(self.store(rows, entity, mode))
    }

    async fn update_entity(
        &self,
        entity: TableEntity,
        if_match: &ETag,
        mode: UpdateMode,
    ) -> StoreResult<ETag> {
        let mut guard = self.rows.write().await;
        let rows = guard.as_mut().ok_or_else(|| self.missing_table())?;
        self.check_precondition(rows, &entity.partition_key, &entity.row_key, if_match)?;
        Ok(self.store(rows, entity, mode))
    }

    async fn delete_entity(
        &self,
        partition_key: &str,
        row_key: &str,
        if_match: &ETag,
    ) -> StoreResult<()> {
        let mut guard = self.rows.write().await;
        let rows = guard.as_mut().ok_or_else(|| self.missing_table())?;
        self.check_precondition(rows, partition_key, row_key, if_match)?;
        rows.remove(&(partition_key.to_string(), row_key.to_string()));
        Ok(())
    }

    async fn query_page(
        &self,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> StoreResult<Page> {
        let take = query.take.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let guard = self.rows.read().await;
        let rows = guard.as_ref().ok_or_else(|| self.missing_table())?;

        let pinned = query.filter.as_ref().and_then(|f| f.pinned_partition());
        let start = match (&continuation, pinned) {
            (Some(token), _) => (token.next_partition_key.clone(), token.next_row_key.clone()),
            (None, Some(pk)) => (pk.to_string(), String::new()),
            (None, None) => (String::new(), String::new()),
        };

        let mut entities = Vec::with_capacity(take.min(64));
        let mut next = None;
        for ((pk, rk), entity) in rows.range((Bound::Included(start), Bound::Unbounded)) {
            if pinned.is_some_and(|p| p != pk.as_str()) {
                break;
            }
            if !query.filter.as_ref().is_none_or(|f| f.matches(entity)) {
                continue;
            }
            if entities.len() == take {
                next = Some(ContinuationToken {
                    next_partition_key: pk.clone(),
                    next_row_key: rk.clone(),
                });
                break;
            }
            let mut entity = entity.clone();
            if let Some(columns) = &query.select {
                entity.project(columns);
            }
            entities.push(entity);
        }

        Ok(Page {
            entities,
            continuation: next,
        })
    }

    async fn submit_transaction(&self, actions: Vec<TransactionAction>) -> StoreResult<()> {
        validate_batch(&actions)?;
        let mut guard = self.rows.write().await;
        let rows = guard.as_mut().ok_or_else(|| self.missing_table())?;
        for action in &actions {
            self.check_action(rows, action)?;
        }
        for action in actions {
            self.apply_action(rows, action);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::filter::Filter;

    async fn table() -> InMemoryTable {
        let table = InMemoryTable::new("test");
        table.create_if_not_exists().await.unwrap();
        table
    }

    #[tokio::test]
    async fn operations_require_created_table() {
        let table = InMemoryTable::new("missing");
        let err = table.get_entity("a", "b", None).await.unwrap_err();
        assert_eq!(err, StoreError::TableNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn add_rejects_duplicates_and_upsert_replaces() {
        let table = table().await;
        table
            .add_entity(TableEntity::new("p", "r").with("A", "1"))
            .await
            .unwrap();
        let err = table
            .add_entity(TableEntity::new("p", "r"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EntityExists { .. }));

        table
            .upsert_entity(TableEntity::new("p", "r").with("B", "2"), UpdateMode::Replace)
            .await
            .unwrap();
        let stored = table.get_entity("p", "r", None).await.unwrap();
        assert!(stored.get("A").is_none());
        assert_eq!(stored.get_str("B"), Some("2"));
    }

    #[tokio::test]
    async fn merge_keeps_unmentioned_properties() {
        let table = table().await;
        table
            .add_entity(TableEntity::new("p", "r").with("A", "1"))
            .await
            .unwrap();
        table
            .upsert_entity(TableEntity::new("p", "r").with("B", "2"), UpdateMode::Merge)
            .await
            .unwrap();
        let stored = table.get_entity("p", "r", None).await.unwrap();
        assert_eq!(stored.get_str("A"), Some("1"));
        assert_eq!(stored.get_str("B"), Some("2"));
    }

    #[tokio::test]
    async fn update_honours_etag() {
        let table = table().await;
        let etag = table.add_entity(TableEntity::new("p", "r")).await.unwrap();
        let newer = table
            .update_entity(TableEntity::new("p", "r"), &etag, UpdateMode::Replace)
            .await
            .unwrap();
        let err = table
            .update_entity(TableEntity::new("p", "r"), &etag, UpdateMode::Replace)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
        table.delete_entity("p", "r", &newer).await.unwrap();
        let err = table.delete_entity("p", "r", &ETag::all()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rejects_disallowed_key_characters() {
        let table = table().await;
        let err = table
            .add_entity(TableEntity::new("a/b", "r"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn pages_through_partition_with_continuation() {
        let table = table().await;
        for i in 0..25 {
            table
                .add_entity(TableEntity::new("p", format!("r{:02}", i)))
                .await
                .unwrap();
        }
        table.add_entity(TableEntity::new("q", "r00")).await.unwrap();

        let query = TableQuery::new(Filter::partition_eq("p")).take(10);
        let first = table.query_page(&query, None).await.unwrap();
        assert_eq!(first.entities.len(), 10);
        let second = table
            .query_page(&query, first.continuation.clone())
            .await
            .unwrap();
        assert_eq!(second.entities[0].row_key, "r10");
        let third = table.query_page(&query, second.continuation).await.unwrap();
        assert_eq!(third.entities.len(), 5);
        assert!(third.continuation.is_none());

        assert_eq!(table.query_all(&query).await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn transaction_is_all_or_nothing() {
        let table = table().await;
        table.add_entity(TableEntity::new("p", "exists")).await.unwrap();
        let err = table
            .submit_transaction(vec![
                TransactionAction::Add(TableEntity::new("p", "new")),
                TransactionAction::Add(TableEntity::new("p", "exists")),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EntityExists { .. }));
        assert_eq!(table.row_count().await, 1);
    }

    #[tokio::test]
    async fn transaction_rejects_mixed_partitions_and_oversize() {
        let table = table().await;
        let err = table
            .submit_transaction(vec![
                TransactionAction::Add(TableEntity::new("p", "a")),
                TransactionAction::Add(TableEntity::new("q", "a")),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBatch(_)));

        let oversize = (0..=MAX_BATCH_OPERATIONS)
            .map(|i| TransactionAction::Add(TableEntity::new("p", format!("r{}", i))))
            .collect();
        let err = table.submit_transaction(oversize).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBatch(_)));
    }

    #[tokio::test]
    async fn service_shares_tables_by_name() {
        let service = InMemoryTableService::new();
        let a = service.table("Users");
        let b = service.table("Users");
        a.create_if_not_exists().await.unwrap();
        a.add_entity(TableEntity::new("p", "r")).await.unwrap();
        assert!(b.get_entity("p", "r", None).await.is_ok());
        assert_eq!(service.list_tables().await.unwrap(), vec!["Users".to_string()]);
    }
}
