//! Cross-partition resolution of index owners into user profiles.
//!
//! An index scan yields owner keys a page at a time. Each page is cut into
//! batches; every batch becomes one query whose filter ORs a point
//! predicate per owner, so a page of owners costs a handful of round trips
//! instead of one per owner. Batches run as spawned tasks, at most
//! `max_concurrency` at once. The first failing batch fails the whole query
//! and the remaining tasks are aborted when the task set drops.

use super::aggregate::RowKind;
use super::ensure_active;
use super::index::{IndexKey, IndexStore};
use crate::core::{IdentityError, Result};
use crate::model::{IdentityUser, TableRecord};
use crate::table::{Filter, MAX_PAGE_SIZE, TableClient, TableEntity, TableQuery};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Paging and concurrency bounds for fan-out queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FanoutOptions {
    /// Owner keys read from the index per page
    pub page_size: usize,

    /// Owner keys folded into one filtered query
    pub batch_size: usize,

    /// Batch queries in flight at once
    pub max_concurrency: usize,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            page_size: 30,
            batch_size: 50,
            max_concurrency: 10,
        }
    }
}

impl FanoutOptions {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(format!("fanout.page_size must be 1-{}", MAX_PAGE_SIZE));
        }
        if self.batch_size == 0 {
            return Err("fanout.batch_size must be positive".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("fanout.max_concurrency must be positive".to_string());
        }
        Ok(())
    }
}

/// A profile plus any extra rows requested alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedUser {
    pub user: IdentityUser,
    pub rows: Vec<TableEntity>,
}

type FetchPredicate = Arc<dyn Fn(&FetchedUser) -> bool + Send + Sync>;

pub struct FanoutQuery {
    users: Arc<dyn TableClient>,
    index: IndexStore,
    options: FanoutOptions,
    extra_row: Option<String>,
    predicate: Option<FetchPredicate>,
}

impl FanoutQuery {
    pub fn new(users: Arc<dyn TableClient>, index: IndexStore, options: FanoutOptions) -> Self {
        Self {
            users,
            index,
            options,
            extra_row: None,
            predicate: None,
        }
    }

    /// Also fetch the row `row_key` from every owner's partition.
    pub fn with_row(mut self, row_key: impl Into<String>) -> Self {
        self.extra_row = Some(row_key.into());
        self
    }

    /// Drops fetched users the index matched spuriously.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FetchedUser) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Resolves every owner of `key`, ordered by user key and free of
    /// duplicates.
    pub async fn run(
        &self,
        key: &IndexKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedUser>> {
        ensure_active(cancel)?;
        let started = Instant::now();
        let mut tasks: JoinSet<Result<Vec<FetchedUser>>> = JoinSet::new();
        let mut found = BTreeMap::new();
        let (mut pages, mut batches) = (0usize, 0usize);
        let mut continuation = None;

        loop {
            ensure_active(cancel)?;
            let page = self
                .index
                .lookup_page(key, self.options.page_size, continuation)
                .await?;
            pages += 1;

            for chunk in page.owners.chunks(self.options.batch_size) {
                ensure_active(cancel)?;
                while tasks.len() >= self.options.max_concurrency {
                    if let Some(batch) = next_batch(&mut tasks, cancel).await? {
                        merge(&mut found, batch);
                    }
                }
                tasks.spawn(fetch_batch(
                    self.users.clone(),
                    chunk.to_vec(),
                    self.extra_row.clone(),
                    self.predicate.clone(),
                ));
                batches += 1;
            }

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        while let Some(batch) = next_batch(&mut tasks, cancel).await? {
            merge(&mut found, batch);
        }

        debug!(
            table = self.users.name(),
            pages,
            batches,
            users = found.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fan-out query complete"
        );
        Ok(found.into_values().collect())
    }
}

/// Waits for the next finished batch; `None` once the set is empty.
async fn next_batch(
    tasks: &mut JoinSet<Result<Vec<FetchedUser>>>,
    cancel: &CancellationToken,
) -> Result<Option<Vec<FetchedUser>>> {
    tokio::select! {
        _ = cancel.cancelled() => Err(IdentityError::Cancelled),
        joined = tasks.join_next() => match joined {
            None => Ok(None),
            Some(Ok(batch)) => batch.map(Some),
            Some(Err(e)) => Err(IdentityError::Internal(format!("fan-out task failed: {}", e))),
        },
    }
}

/// Keeps the first copy of each user.
fn merge(found: &mut BTreeMap<String, FetchedUser>, batch: Vec<FetchedUser>) {
    for fetched in batch {
        found
            .entry(fetched.user.row.partition_key.clone())
            .or_insert(fetched);
    }
}

async fn fetch_batch(
    users: Arc<dyn TableClient>,
    owners: Vec<String>,
    extra_row: Option<String>,
    predicate: Option<FetchPredicate>,
) -> Result<Vec<FetchedUser>> {
    let points = owners.iter().flat_map(|owner| {
        let profile = Filter::point(owner, owner);
        let extra = extra_row.as_ref().map(|row_key| Filter::point(owner, row_key));
        std::iter::once(profile).chain(extra)
    });
    let Some(filter) = Filter::any_of(points) else {
        return Ok(Vec::new());
    };

    trace!(owners = owners.len(), filter = %filter.to_odata(), "fetching batch");
    let rows = users.query_all(&TableQuery::new(filter)).await?;

    let mut profiles: BTreeMap<String, IdentityUser> = BTreeMap::new();
    let mut extras: BTreeMap<String, Vec<TableEntity>> = BTreeMap::new();
    for entity in rows {
        if RowKind::of(&entity) == RowKind::Profile {
            profiles.insert(entity.partition_key.clone(), IdentityUser::from_entity(&entity));
        } else {
            extras
                .entry(entity.partition_key.clone())
                .or_default()
                .push(entity);
        }
    }

    Ok(profiles
        .into_iter()
        .map(|(user_key, user)| FetchedUser {
            user,
            rows: extras.remove(&user_key).unwrap_or_default(),
        })
        .filter(|fetched| predicate.as_ref().is_none_or(|keep| keep(fetched)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyHelper;
    use crate::table::{InMemoryTable, UpdateMode};

    async fn seeded(users: usize) -> (Arc<InMemoryTable>, IndexStore) {
        let keys = KeyHelper::new();
        let user_table = Arc::new(InMemoryTable::new("users"));
        let index_table = Arc::new(InMemoryTable::new("index"));
        user_table.create_if_not_exists().await.unwrap();
        index_table.create_if_not_exists().await.unwrap();
        let index = IndexStore::new(index_table, keys);

        for i in 0..users {
            let mut user = IdentityUser::new(format!("user{:03}", i));
            user.generate_keys(&keys);
            user_table
                .upsert_entity(user.to_entity(), UpdateMode::Replace)
                .await
                .unwrap();
            index
                .upsert(&IndexKey::Role("reader".into()), &user.row.partition_key)
                .await
                .unwrap();
        }
        (user_table, index)
    }

    #[test]
    fn default_options_are_valid() {
        let options = FanoutOptions::default();
        assert_eq!((options.page_size, options.batch_size, options.max_concurrency), (30, 50, 10));
        assert!(options.validate().is_ok());
        let zero = FanoutOptions {
            max_concurrency: 0,
            ..options
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test]
    async fn resolves_every_owner_across_pages() {
        let (users, index) = seeded(75).await;
        let options = FanoutOptions {
            page_size: 20,
            batch_size: 7,
            max_concurrency: 2,
        };
        let fetched = FanoutQuery::new(users, index, options)
            .run(&IndexKey::Role("reader".into()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetched.len(), 75);
        assert!(fetched.windows(2).all(|w| w[0].user.row.row_key < w[1].user.row.row_key));
    }

    #[tokio::test]
    async fn predicate_filters_results() {
        let (users, index) = seeded(10).await;
        let fetched = FanoutQuery::new(users, index, FanoutOptions::default())
            .filter(|f| f.user.user_name.ends_with('3'))
            .run(&IndexKey::Role("reader".into()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].user.user_name, "user003");
    }

    #[tokio::test]
    async fn stale_index_entries_are_skipped() {
        let (users, index) = seeded(3).await;
        index
            .upsert(&IndexKey::Role("reader".into()), "U_missing")
            .await
            .unwrap();
        let fetched = FanoutQuery::new(users, index, FanoutOptions::default())
            .run(&IndexKey::Role("reader".into()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetched.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_io() {
        let (users, index) = seeded(3).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = FanoutQuery::new(users, index, FanoutOptions::default())
            .run(&IndexKey::Role("reader".into()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Cancelled));
    }
}
