use super::entity::{ETag, TableEntity};
use super::filter::Filter;
use crate::core::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Maximum number of actions the store accepts in one atomic transaction.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// Largest page a single query returns when no `take` is requested.
pub const MAX_PAGE_SIZE: usize = 1000;

/// How an upsert or update treats properties missing from the new entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Replace the stored row wholesale.
    #[default]
    Replace,
    /// Keep stored properties the new entity does not mention.
    Merge,
}

/// Opaque cursor for resuming a paginated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    pub(crate) next_partition_key: String,
    pub(crate) next_row_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub filter: Option<Filter>,
    pub select: Option<Vec<String>>,
    pub take: Option<usize>,
}

impl TableQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            select: None,
            take: None,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entities: Vec<TableEntity>,
    pub continuation: Option<ContinuationToken>,
}

/// A single action inside a same-partition transaction.
#[derive(Debug, Clone)]
pub enum TransactionAction {
    Add(TableEntity),
    Upsert(TableEntity, UpdateMode),
    Update(TableEntity, ETag, UpdateMode),
    Delete {
        partition_key: String,
        row_key: String,
        if_match: ETag,
    },
}

impl TransactionAction {
    pub fn key(&self) -> (&str, &str) {
        match self {
            Self::Add(entity) | Self::Upsert(entity, _) | Self::Update(entity, _, _) => {
                entity.key()
            }
            Self::Delete {
                partition_key,
                row_key,
                ..
            } => (partition_key, row_key),
        }
    }

    pub fn partition_key(&self) -> &str {
        self.key().0
    }
}

/// A partitioned key-value table.
///
/// Point operations report a missing row as [`StoreError::NotFound`];
/// callers decide whether that is an absence or a failure.
///
/// [`StoreError::NotFound`]: crate::core::StoreError::NotFound
#[async_trait]
pub trait TableClient: Send + Sync {
    fn name(&self) -> &str;

    async fn create_if_not_exists(&self) -> StoreResult<()>;

    async fn get_entity(
        &self,
        partition_key: &str,
        row_key: &str,
        select: Option<&[String]>,
    ) -> StoreResult<TableEntity>;

    /// Inserts a new row; fails with `EntityExists` when the key is taken.
    async fn add_entity(&self, entity: TableEntity) -> StoreResult<ETag>;

    async fn upsert_entity(&self, entity: TableEntity, mode: UpdateMode) -> StoreResult<ETag>;

    /// Replaces or merges an existing row whose tag satisfies `if_match`.
    async fn update_entity(
        &self,
        entity: TableEntity,
        if_match: &ETag,
        mode: UpdateMode,
    ) -> StoreResult<ETag>;

    async fn delete_entity(
        &self,
        partition_key: &str,
        row_key: &str,
        if_match: &ETag,
    ) -> StoreResult<()>;

    /// Returns one page of rows matching `query`, in `(partition, row)` order.
    async fn query_page(
        &self,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> StoreResult<Page>;

    /// Applies every action atomically. All actions must share one partition.
    async fn submit_transaction(&self, actions: Vec<TransactionAction>) -> StoreResult<()>;

    /// Drains every page of `query`.
    async fn query_all(&self, query: &TableQuery) -> StoreResult<Vec<TableEntity>> {
        let mut entities = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.query_page(query, continuation).await?;
            entities.extend(page.entities);
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(entities),
            }
        }
    }

    /// First matching row, if any.
    async fn query_first(&self, query: &TableQuery) -> StoreResult<Option<TableEntity>> {
        let mut continuation = None;
        loop {
            let page = self.query_page(query, continuation).await?;
            if let Some(first) = page.entities.into_iter().next() {
                return Ok(Some(first));
            }
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(None),
            }
        }
    }
}

/// Hands out table clients by name.
pub trait TableService: Send + Sync {
    fn table(&self, name: &str) -> Arc<dyn TableClient>;
}
