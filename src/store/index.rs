//! Secondary "attribute -> owner" records.
//!
//! Most categories map one attribute to many owners and store
//! `partition = attribute key, row = owner key`. Logins map to a single owner
//! and store `partition = provider key, row = login key` instead.

use crate::core::{Result, StoreError};
use crate::keys::KeyHelper;
use crate::model::{IdentityUserIndex, TableRecord};
use crate::table::{ContinuationToken, ETag, Filter, TableClient, TableQuery, UpdateMode};
use futures::future::try_join_all;
use std::sync::Arc;

/// Names an indexed attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    UserName(String),
    Email(String),
    Role(String),
    Claim { claim_type: String, value: String },
    Login { provider: String, provider_key: String },
}

impl IndexKey {
    pub fn claim(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Claim {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    pub fn login(provider: impl Into<String>, provider_key: impl Into<String>) -> Self {
        Self::Login {
            provider: provider.into(),
            provider_key: provider_key.into(),
        }
    }

    /// Partition holding this attribute's records.
    pub fn partition_key(&self, keys: &KeyHelper) -> String {
        match self {
            Self::UserName(name) => keys.user_name(name),
            Self::Email(email) => keys.email(email),
            Self::Role(role) => keys.role(role),
            Self::Claim { claim_type, value } => keys.claim(claim_type, value),
            Self::Login { provider, .. } => keys.login_provider(provider),
        }
    }

    /// Row of the record pointing at `owner_key`.
    pub fn row_key(&self, keys: &KeyHelper, owner_key: &str) -> String {
        match self {
            Self::Login {
                provider,
                provider_key,
            } => keys.login(provider, provider_key),
            _ => owner_key.to_string(),
        }
    }

    /// Filter selecting every record of this attribute.
    fn scope(&self, keys: &KeyHelper) -> Filter {
        let partition = Filter::partition_eq(self.partition_key(keys));
        match self {
            Self::Login {
                provider,
                provider_key,
            } => partition.and(Filter::row_eq(keys.login(provider, provider_key))),
            _ => partition,
        }
    }
}

/// One page of owner keys.
#[derive(Debug, Clone, Default)]
pub struct OwnerPage {
    pub owners: Vec<String>,
    pub continuation: Option<ContinuationToken>,
}

#[derive(Clone)]
pub struct IndexStore {
    table: Arc<dyn TableClient>,
    keys: KeyHelper,
}

impl IndexStore {
    pub fn new(table: Arc<dyn TableClient>, keys: KeyHelper) -> Self {
        Self { table, keys }
    }

    pub fn table(&self) -> &Arc<dyn TableClient> {
        &self.table
    }

    fn record(&self, key: &IndexKey, owner_key: &str) -> IdentityUserIndex {
        let mut record = IdentityUserIndex {
            id: owner_key.to_string(),
            key_version: self.keys.key_version(),
            ..IdentityUserIndex::default()
        };
        record.row.partition_key = key.partition_key(&self.keys);
        record.row.row_key = key.row_key(&self.keys, owner_key);
        record
    }

    /// Points `key` at `owner_key`. Repeating the call is harmless.
    pub async fn upsert(&self, key: &IndexKey, owner_key: &str) -> Result<()> {
        let entity = self.record(key, owner_key).to_entity();
        self.table.upsert_entity(entity, UpdateMode::Replace).await?;
        Ok(())
    }

    /// Removes the record for `key` and `owner_key`; absent records are fine.
    ///
    /// Login records are keyed without the owner, so they are only removed
    /// while they still point at `owner_key`.
    pub async fn delete(&self, key: &IndexKey, owner_key: &str) -> Result<()> {
        let partition_key = key.partition_key(&self.keys);
        let row_key = key.row_key(&self.keys, owner_key);
        let if_match = match key {
            IndexKey::Login { .. } => {
                match self.table.get_entity(&partition_key, &row_key, None).await {
                    Ok(entity) if IdentityUserIndex::from_entity(&entity).id == owner_key => {
                        entity.etag
                    }
                    Ok(_) => return Ok(()),
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
            _ => ETag::all(),
        };
        match self
            .table
            .delete_entity(&partition_key, &row_key, &if_match)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(StoreError::PreconditionFailed(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Scans `key` and removes every record whose owner is `owner_key`.
    pub async fn delete_owned(&self, key: &IndexKey, owner_key: &str) -> Result<usize> {
        let query = TableQuery::new(
            key.scope(&self.keys)
                .and(Filter::property_eq("Id", owner_key)),
        );
        let stale = self.table.query_all(&query).await?;
        let removed = stale.len();
        try_join_all(stale.iter().map(|entity| async move {
            match self
                .table
                .delete_entity(&entity.partition_key, &entity.row_key, &ETag::all())
                .await
            {
                Err(e) if !e.is_not_found() => Err(e),
                _ => Ok::<(), StoreError>(()),
            }
        }))
        .await?;
        Ok(removed)
    }

    /// Owner of `key`, when one is recorded.
    pub async fn lookup_one(&self, key: &IndexKey) -> Result<Option<String>> {
        let query = TableQuery::new(key.scope(&self.keys)).take(1);
        let first = self.table.query_first(&query).await?;
        Ok(first
            .map(|entity| IdentityUserIndex::from_entity(&entity).id)
            .filter(|owner| !owner.is_empty()))
    }

    /// Up to `page_size` owners of `key`, resuming after `continuation`.
    pub async fn lookup_page(
        &self,
        key: &IndexKey,
        page_size: usize,
        continuation: Option<ContinuationToken>,
    ) -> Result<OwnerPage> {
        let query = TableQuery::new(key.scope(&self.keys))
            .select(&["Id"])
            .take(page_size);
        let page = self.table.query_page(&query, continuation).await?;
        Ok(OwnerPage {
            owners: page
                .entities
                .iter()
                .map(|entity| IdentityUserIndex::from_entity(entity).id)
                .filter(|owner| !owner.is_empty())
                .collect(),
            continuation: page.continuation,
        })
    }

    /// Every owner of `key`.
    pub async fn lookup_many(&self, key: &IndexKey, page_size: usize) -> Result<Vec<String>> {
        let mut owners = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.lookup_page(key, page_size, continuation).await?;
            owners.extend(page.owners);
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(owners),
            }
        }
    }
}
