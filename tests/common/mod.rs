//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use table_identity::table::{
    ContinuationToken, InMemoryTable, Page, TableQuery, TransactionAction, UpdateMode,
};
use table_identity::{
    ETag, FanoutOptions, RoleStore, StoreError, StoreResult, TableClient, TableEntity,
    UserRoleStore, UserStore,
};

/// Wraps a table, counting calls and optionally injecting failures or
/// latency into queries and the first transaction.
pub struct ProbeTable {
    inner: Arc<InMemoryTable>,
    pub queries: AtomicUsize,
    pub transactions: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub max_comparisons: AtomicUsize,
    fail_adds: AtomicBool,
    fail_queries_after: AtomicUsize,
    query_delay: Duration,
    first_transaction_delay_ms: AtomicU64,
}

impl ProbeTable {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_delay(name, Duration::ZERO)
    }

    pub fn with_delay(name: &str, query_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(InMemoryTable::new(name)),
            queries: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            max_comparisons: AtomicUsize::new(0),
            fail_adds: AtomicBool::new(false),
            fail_queries_after: AtomicUsize::new(usize::MAX),
            query_delay,
            first_transaction_delay_ms: AtomicU64::new(0),
        })
    }

    pub fn inner(&self) -> &Arc<InMemoryTable> {
        &self.inner
    }

    pub fn reset_counters(&self) {
        self.queries.store(0, Ordering::SeqCst);
        self.transactions.store(0, Ordering::SeqCst);
        self.max_in_flight.store(0, Ordering::SeqCst);
        self.max_comparisons.store(0, Ordering::SeqCst);
    }

    /// Holds back the next first transaction so later ones can overtake it.
    pub fn delay_first_transaction(&self, delay: Duration) {
        self.transactions.store(0, Ordering::SeqCst);
        self.first_transaction_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_adds(&self) {
        self.fail_adds.store(true, Ordering::SeqCst);
    }

    /// Lets `count` more queries through, then fails every query.
    pub fn fail_queries_after(&self, count: usize) {
        self.queries.store(0, Ordering::SeqCst);
        self.fail_queries_after.store(count, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub async fn partition_rows(&self, partition_key: &str) -> Vec<TableEntity> {
        let query = TableQuery::new(table_identity::Filter::partition_eq(partition_key));
        self.inner.query_all(&query).await.unwrap()
    }

    pub async fn all_rows(&self) -> Vec<TableEntity> {
        self.inner.query_all(&TableQuery::all()).await.unwrap()
    }
}

#[async_trait]
impl TableClient for ProbeTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_if_not_exists(&self) -> StoreResult<()> {
        self.inner.create_if_not_exists().await
    }

    async fn get_entity(
        &self,
        partition_key: &str,
        row_key: &str,
        select: Option<&[String]>,
    ) -> StoreResult<TableEntity> {
        self.inner.get_entity(partition_key, row_key, select).await
    }

    async fn add_entity(&self, entity: TableEntity) -> StoreResult<ETag> {
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected add failure".to_string()));
        }
        self.inner.add_entity(entity).await
    }

    async fn upsert_entity(&self, entity: TableEntity, mode: UpdateMode) -> StoreResult<ETag> {
        self.inner.upsert_entity(entity, mode).await
    }

    async fn update_entity(
        &self,
        entity: TableEntity,
        if_match: &ETag,
        mode: UpdateMode,
    ) -> StoreResult<ETag> {
        self.inner.update_entity(entity, if_match, mode).await
    }

    async fn delete_entity(
        &self,
        partition_key: &str,
        row_key: &str,
        if_match: &ETag,
    ) -> StoreResult<()> {
        self.inner.delete_entity(partition_key, row_key, if_match).await
    }

    async fn query_page(
        &self,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> StoreResult<Page> {
        let seen = self.queries.fetch_add(1, Ordering::SeqCst);
        if seen >= self.fail_queries_after.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected query failure".to_string()));
        }
        if let Some(filter) = &query.filter {
            self.max_comparisons
                .fetch_max(filter.comparison_count(), Ordering::SeqCst);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        let page = self.inner.query_page(query, continuation).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        page
    }

    async fn submit_transaction(&self, actions: Vec<TransactionAction>) -> StoreResult<()> {
        let seen = self.transactions.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.first_transaction_delay_ms.load(Ordering::SeqCst);
        if seen == 0 && delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        self.inner.submit_transaction(actions).await
    }
}

/// User, index and role tables behind probes, plus a store over them.
pub struct Fixture {
    pub users: Arc<ProbeTable>,
    pub index: Arc<ProbeTable>,
    pub roles: Arc<ProbeTable>,
    pub store: UserRoleStore,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_options(FanoutOptions::default(), Duration::ZERO).await
    }

    pub async fn with_options(options: FanoutOptions, query_delay: Duration) -> Self {
        let users = ProbeTable::with_delay("users", query_delay);
        let index = ProbeTable::new("index");
        let roles = ProbeTable::new("roles");
        let store = UserRoleStore::new(
            UserStore::from_tables(users.clone(), index.clone(), options),
            RoleStore::from_table(roles.clone()),
        );
        store
            .create_tables_if_not_exist(&table_identity::CancellationToken::new())
            .await
            .unwrap();
        Self {
            users,
            index,
            roles,
            store,
        }
    }

    pub fn users(&self) -> &UserStore {
        self.store.users()
    }
}
