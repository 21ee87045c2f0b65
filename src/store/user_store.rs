//! Primary store for user aggregates.
//!
//! A user owns one partition keyed by its user key: the profile row sits at
//! `row == partition`, subordinate claim, login, token and role rows next to
//! it under content-derived row keys. Attribute lookups go through the
//! index table, which this store keeps in step on every write. Index writes
//! are not atomic with row writes; a failure between them leaves a stale
//! index record that lookups verify against the profile.

use super::aggregate::{RowKind, UserAggregate};
use super::batch::BatchOperationHelper;
use super::fanout::{FanoutOptions, FanoutQuery};
use super::index::{IndexKey, IndexStore};
use super::{category_rows, ensure_active, ignore_missing};
use crate::context::IdentityCloudContext;
use crate::core::{IdentityError, Result, StoreError};
use crate::keys::{KeyCategory, KeyHelper};
use crate::model::{
    Claim, IdentityUser, IdentityUserClaim, IdentityUserLogin, IdentityUserToken, TableRecord,
    UserLoginInfo,
};
use crate::table::{
    ContinuationToken, ETag, Filter, TableClient, TableEntity, TableQuery, UpdateMode,
};
use futures::future::try_join_all;
use futures::try_join;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One page of user profiles.
#[derive(Debug, Clone, Default)]
pub struct UserPage {
    pub users: Vec<IdentityUser>,
    pub continuation: Option<ContinuationToken>,
}

#[derive(Clone)]
pub struct UserStore {
    users: Arc<dyn TableClient>,
    index: IndexStore,
    keys: KeyHelper,
    fanout: FanoutOptions,
}

/// Logs the underlying cause of a joined write and replaces it with the
/// coarse per-operation error.
fn collapse(
    operation: &'static str,
    coarse: IdentityError,
) -> impl FnOnce(IdentityError) -> IdentityError {
    move |cause| {
        warn!(operation, error = %cause, "joined write failed");
        coarse
    }
}

fn same_ignoring_case(a: &str, b: &str) -> bool {
    a.to_uppercase() == b.to_uppercase()
}

impl UserStore {
    pub fn new(context: &IdentityCloudContext) -> Self {
        Self::from_tables(
            context.user_table(),
            context.index_table(),
            context.config().fanout,
        )
    }

    pub fn from_tables(
        users: Arc<dyn TableClient>,
        index: Arc<dyn TableClient>,
        fanout: FanoutOptions,
    ) -> Self {
        let keys = KeyHelper::new();
        Self {
            users,
            index: IndexStore::new(index, keys),
            keys,
            fanout,
        }
    }

    pub fn keys(&self) -> &KeyHelper {
        &self.keys
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub(crate) fn users_table(&self) -> &Arc<dyn TableClient> {
        &self.users
    }

    pub(crate) fn fanout_query(&self) -> FanoutQuery {
        FanoutQuery::new(self.users.clone(), self.index.clone(), self.fanout)
    }

    /// Partition key of a persisted user.
    pub(crate) fn user_key(&self, user: &IdentityUser) -> Result<String> {
        if user.id.is_empty() {
            return Err(IdentityError::InvalidArgument("user.id"));
        }
        Ok(self.keys.user_id(&user.id))
    }

    pub async fn create_tables_if_not_exist(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        try_join!(
            self.users.create_if_not_exists(),
            self.index.table().create_if_not_exists()
        )?;
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityUser>> {
        ensure_active(cancel)?;
        if id.is_empty() {
            return Err(IdentityError::InvalidArgument("id"));
        }
        self.find_by_key(&self.keys.user_id(id)).await
    }

    pub(crate) async fn find_by_key(&self, user_key: &str) -> Result<Option<IdentityUser>> {
        match self.users.get_entity(user_key, user_key, None).await {
            Ok(entity) => Ok(Some(IdentityUser::from_entity(&entity))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every row of the user's partition, reassembled.
    pub async fn get_aggregate(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<UserAggregate>> {
        ensure_active(cancel)?;
        if id.is_empty() {
            return Err(IdentityError::InvalidArgument("id"));
        }
        let rows = self.partition_rows(&self.keys.user_id(id)).await?;
        Ok(UserAggregate::from_rows(&rows))
    }

    async fn partition_rows(&self, user_key: &str) -> Result<Vec<TableEntity>> {
        let query = TableQuery::new(Filter::partition_eq(user_key));
        Ok(self.users.query_all(&query).await?)
    }

    /// User whose name matches `user_name`, ignoring case.
    pub async fn find_by_name(
        &self,
        user_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityUser>> {
        ensure_active(cancel)?;
        if user_name.is_empty() {
            return Err(IdentityError::InvalidArgument("user_name"));
        }
        let key = IndexKey::UserName(user_name.to_string());
        for owner in self.index.lookup_many(&key, self.fanout.page_size).await? {
            if let Some(user) = self.find_by_key(&owner).await?
                && same_ignoring_case(&user.user_name, user_name)
            {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// First user holding `email`. Emails need not be unique; see
    /// [`UserStore::find_all_by_email`].
    pub async fn find_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityUser>> {
        ensure_active(cancel)?;
        if email.is_empty() {
            return Err(IdentityError::InvalidArgument("email"));
        }
        let key = IndexKey::Email(email.to_string());
        for owner in self.index.lookup_many(&key, self.fanout.page_size).await? {
            ensure_active(cancel)?;
            if let Some(user) = self.find_by_key(&owner).await?
                && user.email.as_deref().is_some_and(|e| same_ignoring_case(e, email))
            {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    pub async fn find_all_by_email(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityUser>> {
        ensure_active(cancel)?;
        if email.is_empty() {
            return Err(IdentityError::InvalidArgument("email"));
        }
        let wanted = email.to_uppercase();
        let fetched = self
            .fanout_query()
            .filter(move |f| {
                f.user
                    .email
                    .as_deref()
                    .is_some_and(|e| e.to_uppercase() == wanted)
            })
            .run(&IndexKey::Email(email.to_string()), cancel)
            .await?;
        Ok(fetched.into_iter().map(|f| f.user).collect())
    }

    /// Lists profiles in key order, `take` at a time.
    pub async fn users_page(
        &self,
        take: usize,
        continuation: Option<ContinuationToken>,
        cancel: &CancellationToken,
    ) -> Result<UserPage> {
        ensure_active(cancel)?;
        if take == 0 {
            return Err(IdentityError::InvalidArgument("take"));
        }
        let users = KeyCategory::UserId;
        let query = TableQuery::new(
            Filter::partition_range(users.prefix(), users.upper_bound())
                .and(Filter::row_range(users.prefix(), users.upper_bound())),
        )
        .take(take);
        let page = self.users.query_page(&query, continuation).await?;
        Ok(UserPage {
            users: page
                .entities
                .iter()
                .filter(|e| RowKind::of(e) == RowKind::Profile)
                .map(IdentityUser::from_entity)
                .collect(),
            continuation: page.continuation,
        })
    }

    fn prepare(&self, user: &mut IdentityUser) -> Result<()> {
        if user.user_name.is_empty() {
            return Err(IdentityError::InvalidArgument("user.user_name"));
        }
        user.normalized_user_name = Some(user.user_name.to_uppercase());
        user.normalized_email = user.email_present().map(str::to_uppercase);
        Ok(())
    }

    /// Upserts the user-name and (when set) email index records.
    async fn write_attribute_indexes(
        &self,
        user_key: &str,
        user_name: &str,
        email: Option<&str>,
    ) -> Result<()> {
        let name = IndexKey::UserName(user_name.to_string());
        try_join!(self.index.upsert(&name, user_key), async {
            match email {
                Some(email) => {
                    let key = IndexKey::Email(email.to_string());
                    self.index.upsert(&key, user_key).await
                }
                None => Ok(()),
            }
        })?;
        Ok(())
    }

    /// Writes the profile and its index records concurrently.
    ///
    /// Assigns a fresh id when `user.id` is empty. Writes that succeed
    /// before another one fails are not undone.
    pub async fn create(&self, user: &mut IdentityUser, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.prepare(user)?;
        user.generate_keys(&self.keys);

        let user_key = user.row.partition_key.clone();
        let entity = user.to_entity();
        let (etag, ()) = try_join!(
            async { self.users.add_entity(entity).await.map_err(IdentityError::from) },
            self.write_attribute_indexes(&user_key, &user.user_name, user.email_present())
        )
        .map_err(collapse("create", IdentityError::CreateFailed))?;

        user.row.etag = etag;
        debug!(user = %user_key, "user created");
        Ok(())
    }

    /// Overwrites the profile regardless of its current tag, then refreshes
    /// the index records.
    pub async fn update(&self, user: &mut IdentityUser, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.prepare(user)?;
        let user_key = self.user_key(user)?;
        user.row.partition_key = user_key.clone();
        user.row.row_key = user_key.clone();

        let entity = user.to_entity();
        let (etag, ()) = try_join!(
            async {
                self.users
                    .update_entity(entity, &ETag::all(), UpdateMode::Replace)
                    .await
                    .map_err(IdentityError::from)
            },
            self.write_attribute_indexes(&user_key, &user.user_name, user.email_present())
        )
        .map_err(collapse("update", IdentityError::UpdateFailed))?;

        user.row.etag = etag;
        Ok(())
    }

    /// Like [`UserStore::update`] but only when the stored profile still
    /// carries `user.row.etag`.
    pub async fn update_if_match(
        &self,
        user: &mut IdentityUser,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        self.prepare(user)?;
        if user.row.etag.is_empty() {
            return Err(IdentityError::InvalidArgument("user.row.etag"));
        }
        let user_key = self.user_key(user)?;
        user.row.partition_key = user_key.clone();
        user.row.row_key = user_key.clone();

        let etag = match self
            .users
            .update_entity(user.to_entity(), &user.row.etag, UpdateMode::Replace)
            .await
        {
            Ok(etag) => etag,
            Err(StoreError::PreconditionFailed(detail)) => {
                return Err(IdentityError::Conflict(detail));
            }
            Err(e) => return Err(collapse("update", IdentityError::UpdateFailed)(e.into())),
        };
        user.row.etag = etag;

        self.write_attribute_indexes(&user_key, &user.user_name, user.email_present())
            .await
            .map_err(collapse("update", IdentityError::UpdateFailed))
    }

    /// Removes every row of the user's partition and every index record
    /// pointing at it.
    pub async fn delete(&self, user: &IdentityUser, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let rows = self.partition_rows(&user_key).await?;
        let aggregate = UserAggregate::from_rows(&rows);

        let mut batch = BatchOperationHelper::new(self.users.clone());
        for entity in &rows {
            batch.delete_entity(&entity.partition_key, &entity.row_key, ETag::all());
        }

        let mut stale = Vec::new();
        if !user.user_name.is_empty() {
            stale.push(IndexKey::UserName(user.user_name.clone()));
        }
        if let Some(email) = user.email_present() {
            stale.push(IndexKey::Email(email.to_string()));
        }
        if let Some(aggregate) = &aggregate {
            if aggregate.user.user_name != user.user_name && !aggregate.user.user_name.is_empty() {
                stale.push(IndexKey::UserName(aggregate.user.user_name.clone()));
            }
            if let Some(email) = aggregate.user.email_present()
                && user.email_present() != Some(email)
            {
                stale.push(IndexKey::Email(email.to_string()));
            }
            stale.extend(
                aggregate
                    .logins
                    .iter()
                    .map(|l| IndexKey::login(&l.login_provider, &l.provider_key)),
            );
            stale.extend(
                aggregate
                    .claims
                    .iter()
                    .map(|c| IndexKey::claim(&c.claim_type, &c.claim_value)),
            );
            stale.extend(aggregate.roles.iter().map(|r| IndexKey::Role(r.role_name.clone())));
        }

        let removed = rows.len();
        try_join!(
            batch.submit(),
            try_join_all(stale.iter().map(|key| self.index.delete(key, &user_key)))
        )
        .map_err(collapse("delete", IdentityError::DeleteFailed))?;

        debug!(user = %user_key, rows = removed, indexes = stale.len(), "user deleted");
        Ok(())
    }

    /// Drops the index record of the old name and assigns the new one.
    /// The caller persists the change with [`UserStore::update`].
    pub async fn set_user_name(
        &self,
        user: &mut IdentityUser,
        user_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        if user_name.is_empty() {
            return Err(IdentityError::InvalidArgument("user_name"));
        }
        if user.user_name != user_name {
            if !user.user_name.is_empty() && !user.id.is_empty() {
                let user_key = self.user_key(user)?;
                self.index
                    .delete_owned(&IndexKey::UserName(user.user_name.clone()), &user_key)
                    .await?;
            }
            user.user_name = user_name.to_string();
        }
        Ok(())
    }

    /// Drops every email index record pointing at the user and assigns the
    /// new email. The caller persists the change with [`UserStore::update`].
    pub async fn set_email(
        &self,
        user: &mut IdentityUser,
        email: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        if user.email.as_deref() != email {
            if let Some(old) = user.email_present()
                && !user.id.is_empty()
            {
                let user_key = self.user_key(user)?;
                self.index
                    .delete_owned(&IndexKey::Email(old.to_string()), &user_key)
                    .await?;
            }
            user.email = email.map(str::to_string);
        }
        Ok(())
    }

    /// Claims of the user written under the current key scheme.
    pub async fn get_claims(
        &self,
        user: &IdentityUser,
        cancel: &CancellationToken,
    ) -> Result<Vec<Claim>> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let rows = self
            .users
            .query_all(&category_rows(&user_key, KeyCategory::Claim))
            .await?;
        Ok(rows
            .iter()
            .map(IdentityUserClaim::from_entity)
            .filter(|c| c.has_current_key(&self.keys))
            .map(|c| c.to_claim())
            .collect())
    }

    /// Idempotent: adding the same claim twice leaves one row.
    pub async fn add_claim(
        &self,
        user: &IdentityUser,
        claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let record = IdentityUserClaim::new(&self.keys, &user.id, claim);
        let key = IndexKey::claim(&claim.claim_type, &claim.value);
        try_join!(
            async {
                self.users
                    .upsert_entity(record.to_entity(), UpdateMode::Replace)
                    .await
                    .map_err(IdentityError::from)
            },
            self.index.upsert(&key, &user_key)
        )?;
        Ok(())
    }

    /// Writes all claim rows in batches, then their index records.
    pub async fn add_claims(
        &self,
        user: &IdentityUser,
        claims: &[Claim],
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        if claims.is_empty() {
            return Ok(());
        }
        let mut batch = BatchOperationHelper::new(self.users.clone());
        for claim in claims {
            let record = IdentityUserClaim::new(&self.keys, &user.id, claim);
            batch.upsert_entity(record.to_entity(), UpdateMode::Replace);
        }
        batch.submit().await?;

        ensure_active(cancel)?;
        try_join_all(claims.iter().map(|claim| {
            let key = IndexKey::claim(&claim.claim_type, &claim.value);
            let user_key = &user_key;
            async move { self.index.upsert(&key, user_key).await }
        }))
        .await?;
        Ok(())
    }

    pub async fn replace_claim(
        &self,
        user: &IdentityUser,
        claim: &Claim,
        new_claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        if claim == new_claim {
            return Ok(());
        }
        self.remove_claim(user, claim, cancel).await?;
        self.add_claim(user, new_claim, cancel).await
    }

    /// No-op when the claim is not held.
    pub async fn remove_claim(
        &self,
        user: &IdentityUser,
        claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let row_key = self.keys.claim(&claim.claim_type, &claim.value);
        let key = IndexKey::claim(&claim.claim_type, &claim.value);
        try_join!(
            async {
                ignore_missing(
                    self.users
                        .delete_entity(&user_key, &row_key, &ETag::all())
                        .await,
                )
            },
            self.index.delete(&key, &user_key)
        )?;
        Ok(())
    }

    pub async fn remove_claims(
        &self,
        user: &IdentityUser,
        claims: &[Claim],
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        try_join_all(claims.iter().map(|claim| self.remove_claim(user, claim, cancel))).await?;
        Ok(())
    }

    /// Users holding `claim`, resolved through the claim index.
    pub async fn get_users_for_claim(
        &self,
        claim: &Claim,
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityUser>> {
        ensure_active(cancel)?;
        let row_key = self.keys.claim(&claim.claim_type, &claim.value);
        let wanted = claim.clone();
        let fetched = self
            .fanout_query()
            .with_row(row_key)
            .filter(move |f| {
                f.rows.iter().any(|row| {
                    RowKind::of(row) == RowKind::Claim
                        && IdentityUserClaim::from_entity(row).to_claim() == wanted
                })
            })
            .run(&IndexKey::claim(&claim.claim_type, &claim.value), cancel)
            .await?;
        Ok(fetched.into_iter().map(|f| f.user).collect())
    }

    pub async fn get_logins(
        &self,
        user: &IdentityUser,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserLoginInfo>> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let rows = self
            .users
            .query_all(&category_rows(&user_key, KeyCategory::Login))
            .await?;
        Ok(rows
            .iter()
            .map(|row| IdentityUserLogin::from_entity(row).to_login_info())
            .collect())
    }

    pub async fn add_login(
        &self,
        user: &IdentityUser,
        login: &UserLoginInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        if login.login_provider.is_empty() || login.provider_key.is_empty() {
            return Err(IdentityError::InvalidArgument("login"));
        }
        let user_key = self.user_key(user)?;
        let record = IdentityUserLogin::new(&self.keys, &user.id, login);
        let key = IndexKey::login(&login.login_provider, &login.provider_key);
        try_join!(
            async {
                self.users
                    .upsert_entity(record.to_entity(), UpdateMode::Replace)
                    .await
                    .map_err(IdentityError::from)
            },
            self.index.upsert(&key, &user_key)
        )?;
        Ok(())
    }

    /// No-op when the login is not linked to this user.
    pub async fn remove_login(
        &self,
        user: &IdentityUser,
        login_provider: &str,
        provider_key: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let row_key = self.keys.login(login_provider, provider_key);
        match self.users.get_entity(&user_key, &row_key, None).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let key = IndexKey::login(login_provider, provider_key);
        try_join!(
            async {
                ignore_missing(
                    self.users
                        .delete_entity(&user_key, &row_key, &ETag::all())
                        .await,
                )
            },
            self.index.delete(&key, &user_key)
        )?;
        Ok(())
    }

    /// Login row of a specific user.
    pub async fn find_user_login(
        &self,
        user_id: &str,
        login_provider: &str,
        provider_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityUserLogin>> {
        ensure_active(cancel)?;
        if user_id.is_empty() {
            return Err(IdentityError::InvalidArgument("user_id"));
        }
        let user_key = self.keys.user_id(user_id);
        let row_key = self.keys.login(login_provider, provider_key);
        match self.users.get_entity(&user_key, &row_key, None).await {
            Ok(entity) => Ok(Some(IdentityUserLogin::from_entity(&entity))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Login row of whichever user linked it.
    pub async fn find_login(
        &self,
        login_provider: &str,
        provider_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityUserLogin>> {
        ensure_active(cancel)?;
        let key = IndexKey::login(login_provider, provider_key);
        let Some(owner) = self.index.lookup_one(&key).await? else {
            return Ok(None);
        };
        let row_key = self.keys.login(login_provider, provider_key);
        match self.users.get_entity(&owner, &row_key, None).await {
            Ok(entity) => Ok(Some(IdentityUserLogin::from_entity(&entity))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityUser>> {
        ensure_active(cancel)?;
        match self.find_login(login_provider, provider_key, cancel).await? {
            Some(login) => self.find_by_key(&login.row.partition_key).await,
            None => Ok(None),
        }
    }

    pub async fn get_token(
        &self,
        user: &IdentityUser,
        login_provider: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let row_key = self.keys.token(login_provider, name);
        match self.users.get_entity(&user_key, &row_key, None).await {
            Ok(entity) => Ok(IdentityUserToken::from_entity(&entity).value),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_token(
        &self,
        user: &IdentityUser,
        login_provider: &str,
        name: &str,
        value: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        self.user_key(user)?;
        let record = IdentityUserToken::new(
            &self.keys,
            &user.id,
            login_provider,
            name,
            value.map(str::to_string),
        );
        self.users
            .upsert_entity(record.to_entity(), UpdateMode::Replace)
            .await?;
        Ok(())
    }

    /// No-op when no such token is stored.
    pub async fn remove_token(
        &self,
        user: &IdentityUser,
        login_provider: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.user_key(user)?;
        let row_key = self.keys.token(login_provider, name);
        ignore_missing(
            self.users
                .delete_entity(&user_key, &row_key, &ETag::all())
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::InMemoryTable;

    async fn store() -> UserStore {
        let store = UserStore::from_tables(
            Arc::new(InMemoryTable::new("users")),
            Arc::new(InMemoryTable::new("index")),
            FanoutOptions::default(),
        );
        store
            .create_tables_if_not_exist(&CancellationToken::new())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_assigns_id_and_etag() {
        let store = store().await;
        let cancel = CancellationToken::new();
        let mut user = IdentityUser {
            user_name: "alice".into(),
            ..IdentityUser::default()
        };
        store.create(&mut user, &cancel).await.unwrap();
        assert!(!user.id.is_empty());
        assert!(!user.row.etag.is_empty());
        assert_eq!(user.normalized_user_name.as_deref(), Some("ALICE"));

        let found = store.find_by_id(&user.id, &cancel).await.unwrap().unwrap();
        assert_eq!(found.user_name, "alice");
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_io() {
        let store = store().await;
        let cancel = CancellationToken::new();
        let mut nameless = IdentityUser::default();
        assert!(matches!(
            store.create(&mut nameless, &cancel).await,
            Err(IdentityError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.find_by_id("", &cancel).await,
            Err(IdentityError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.get_claims(&IdentityUser::default(), &cancel).await,
            Err(IdentityError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn find_by_name_ignores_case() {
        let store = store().await;
        let cancel = CancellationToken::new();
        let mut user = IdentityUser::new("Alice");
        store.create(&mut user, &cancel).await.unwrap();

        let found = store.find_by_name("ALICE", &cancel).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_by_name("bob", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_if_match_detects_conflicts() {
        let store = store().await;
        let cancel = CancellationToken::new();
        let mut user = IdentityUser::new("alice");
        store.create(&mut user, &cancel).await.unwrap();

        let mut stale = user.clone();
        user.phone_number = Some("555".into());
        store.update_if_match(&mut user, &cancel).await.unwrap();

        stale.phone_number = Some("666".into());
        let err = store.update_if_match(&mut stale, &cancel).await.unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(_)));

        let found = store.find_by_id(&user.id, &cancel).await.unwrap().unwrap();
        assert_eq!(found.phone_number.as_deref(), Some("555"));
    }

    #[tokio::test]
    async fn update_of_missing_user_fails_with_code() {
        let store = store().await;
        let cancel = CancellationToken::new();
        let mut ghost = IdentityUser::new("ghost");
        let err = store.update(&mut ghost, &cancel).await.unwrap_err();
        assert_eq!(err.code(), "002");
    }

    #[tokio::test]
    async fn tokens_round_trip() {
        let store = store().await;
        let cancel = CancellationToken::new();
        let mut user = IdentityUser::new("alice");
        store.create(&mut user, &cancel).await.unwrap();

        store
            .set_token(&user, "app", "refresh", Some("r1"), &cancel)
            .await
            .unwrap();
        assert_eq!(
            store.get_token(&user, "app", "refresh", &cancel).await.unwrap().as_deref(),
            Some("r1")
        );
        store.remove_token(&user, "app", "refresh", &cancel).await.unwrap();
        store.remove_token(&user, "app", "refresh", &cancel).await.unwrap();
        assert!(store.get_token(&user, "app", "refresh", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_page_lists_profiles_only() {
        let store = store().await;
        let cancel = CancellationToken::new();
        for i in 0..5 {
            let mut user = IdentityUser::new(format!("user{}", i));
            store.create(&mut user, &cancel).await.unwrap();
            store
                .add_claim(&user, &Claim::new("n", i.to_string()), &cancel)
                .await
                .unwrap();
        }

        let first = store.users_page(3, None, &cancel).await.unwrap();
        assert_eq!(first.users.len(), 3);
        let rest = store
            .users_page(3, first.continuation, &cancel)
            .await
            .unwrap();
        assert_eq!(rest.users.len(), 2);
        assert!(rest.continuation.is_none());
    }

    #[tokio::test]
    async fn cancelled_operations_do_nothing() {
        let store = store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut user = IdentityUser::new("alice");
        assert!(matches!(
            store.create(&mut user, &cancel).await,
            Err(IdentityError::Cancelled)
        ));
        let live = CancellationToken::new();
        assert!(store.find_by_name("alice", &live).await.unwrap().is_none());
    }
}
