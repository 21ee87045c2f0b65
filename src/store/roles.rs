//! Role definitions and user membership.
//!
//! Roles live in their own table keyed by the role key, so lookups by name
//! are point reads. Membership is a row in the member's partition plus a
//! record in the role index; listing a role's members goes through the
//! fan-out engine.

use super::index::IndexKey;
use super::user_store::UserStore;
use super::{category_rows, ensure_active, ignore_missing};
use crate::context::IdentityCloudContext;
use crate::core::{IdentityError, Result};
use crate::keys::{KeyCategory, KeyHelper};
use crate::model::{IdentityRole, IdentityUser, IdentityUserRole, TableRecord};
use crate::table::{ETag, Filter, TableClient, TableQuery, UpdateMode};
use futures::try_join;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct RoleStore {
    roles: Arc<dyn TableClient>,
    keys: KeyHelper,
}

impl RoleStore {
    pub fn new(context: &IdentityCloudContext) -> Self {
        Self::from_table(context.role_table())
    }

    pub fn from_table(roles: Arc<dyn TableClient>) -> Self {
        Self {
            roles,
            keys: KeyHelper::new(),
        }
    }

    pub async fn create_table_if_not_exists(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        Ok(self.roles.create_if_not_exists().await?)
    }

    fn prepare(&self, role: &mut IdentityRole) -> Result<()> {
        if role.name.trim().is_empty() {
            return Err(IdentityError::InvalidArgument("role.name"));
        }
        if role.id.is_empty() {
            return Err(IdentityError::InvalidArgument("role.id"));
        }
        role.normalized_name = Some(role.name.to_uppercase());
        Ok(())
    }

    /// Fails with a store `EntityExists` error when the name is taken.
    pub async fn create(&self, role: &mut IdentityRole, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.prepare(role)?;
        role.generate_keys(&self.keys);
        role.row.etag = self.roles.add_entity(role.to_entity()).await?;
        debug!(role = %role.name, "role created");
        Ok(())
    }

    /// Overwrites the role row. Names are part of the key and cannot change
    /// once the role exists.
    pub async fn update(&self, role: &mut IdentityRole, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.prepare(role)?;
        let role_key = self.keys.role(&role.name);
        if !role.row.row_key.is_empty() && role.row.row_key != role_key {
            return Err(IdentityError::InvalidArgument("role.name"));
        }
        role.generate_keys(&self.keys);
        role.row.etag = self
            .roles
            .update_entity(role.to_entity(), &ETag::all(), UpdateMode::Replace)
            .await?;
        Ok(())
    }

    /// No-op when the role does not exist. Memberships are left in place.
    pub async fn delete(&self, role: &IdentityRole, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        if role.name.is_empty() {
            return Err(IdentityError::InvalidArgument("role.name"));
        }
        let role_key = self.keys.role(&role.name);
        ignore_missing(
            self.roles
                .delete_entity(&role_key, &role_key, &ETag::all())
                .await,
        )
    }

    pub async fn find_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityRole>> {
        ensure_active(cancel)?;
        if name.is_empty() {
            return Err(IdentityError::InvalidArgument("name"));
        }
        let role_key = self.keys.role(name);
        match self.roles.get_entity(&role_key, &role_key, None).await {
            Ok(entity) => Ok(Some(IdentityRole::from_entity(&entity))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Roles are keyed by name, so this scans the role table.
    pub async fn find_by_id(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<IdentityRole>> {
        ensure_active(cancel)?;
        if id.is_empty() {
            return Err(IdentityError::InvalidArgument("id"));
        }
        let roles = KeyCategory::Role;
        let query = TableQuery::new(
            Filter::partition_range(roles.prefix(), roles.upper_bound())
                .and(Filter::property_eq("Id", id)),
        );
        let found = self.roles.query_first(&query).await?;
        Ok(found.as_ref().map(IdentityRole::from_entity))
    }
}

/// User store with role membership.
#[derive(Clone)]
pub struct UserRoleStore {
    users: UserStore,
    roles: RoleStore,
}

impl UserRoleStore {
    pub fn new(users: UserStore, roles: RoleStore) -> Self {
        Self { users, roles }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub async fn create_tables_if_not_exist(&self, cancel: &CancellationToken) -> Result<()> {
        try_join!(
            self.users.create_tables_if_not_exist(cancel),
            self.roles.create_table_if_not_exists(cancel)
        )?;
        Ok(())
    }

    /// Fails with [`IdentityError::RoleNotFound`] when the role is undefined.
    pub async fn add_to_role(
        &self,
        user: &IdentityUser,
        role_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let user_key = self.users.user_key(user)?;
        let Some(role) = self.roles.find_by_name(role_name, cancel).await? else {
            return Err(IdentityError::RoleNotFound(role_name.to_string()));
        };
        let membership = IdentityUserRole::new(self.users.keys(), &user.id, &role);
        let key = IndexKey::Role(role.name.clone());
        try_join!(
            async {
                self.users
                    .users_table()
                    .upsert_entity(membership.to_entity(), UpdateMode::Replace)
                    .await
                    .map_err(IdentityError::from)
            },
            self.users.index().upsert(&key, &user_key)
        )?;
        Ok(())
    }

    /// No-op when the user is not a member.
    pub async fn remove_from_role(
        &self,
        user: &IdentityUser,
        role_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        if role_name.is_empty() {
            return Err(IdentityError::InvalidArgument("role_name"));
        }
        let user_key = self.users.user_key(user)?;
        let row_key = self.users.keys().role(role_name);
        let key = IndexKey::Role(role_name.to_string());
        try_join!(
            async {
                ignore_missing(
                    self.users
                        .users_table()
                        .delete_entity(&user_key, &row_key, &ETag::all())
                        .await,
                )
            },
            self.users.index().delete(&key, &user_key)
        )?;
        Ok(())
    }

    /// Names of the roles the user belongs to.
    pub async fn get_roles(
        &self,
        user: &IdentityUser,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        let user_key = self.users.user_key(user)?;
        let rows = self
            .users
            .users_table()
            .query_all(&category_rows(&user_key, KeyCategory::Role))
            .await?;
        Ok(rows
            .iter()
            .map(|row| IdentityUserRole::from_entity(row).role_name)
            .collect())
    }

    pub async fn is_in_role(
        &self,
        user: &IdentityUser,
        role_name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        ensure_active(cancel)?;
        if role_name.is_empty() {
            return Err(IdentityError::InvalidArgument("role_name"));
        }
        let user_key = self.users.user_key(user)?;
        let row_key = self.users.keys().role(role_name);
        match self
            .users
            .users_table()
            .get_entity(&user_key, &row_key, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Members of `role_name`, resolved through the role index.
    pub async fn get_users_for_role(
        &self,
        role_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityUser>> {
        ensure_active(cancel)?;
        if role_name.is_empty() {
            return Err(IdentityError::InvalidArgument("role_name"));
        }
        let row_key = self.users.keys().role(role_name);
        let membership = row_key.clone();
        let fetched = self
            .users
            .fanout_query()
            .with_row(row_key)
            .filter(move |f| f.rows.iter().any(|row| row.row_key == membership))
            .run(&IndexKey::Role(role_name.to_string()), cancel)
            .await?;
        Ok(fetched.into_iter().map(|f| f.user).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FanoutOptions;
    use crate::table::InMemoryTable;

    async fn stores() -> UserRoleStore {
        let users = UserStore::from_tables(
            Arc::new(InMemoryTable::new("users")),
            Arc::new(InMemoryTable::new("index")),
            FanoutOptions::default(),
        );
        let roles = RoleStore::from_table(Arc::new(InMemoryTable::new("roles")));
        let store = UserRoleStore::new(users, roles);
        store
            .create_tables_if_not_exist(&CancellationToken::new())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn roles_are_found_by_name_and_id() {
        let store = stores().await;
        let cancel = CancellationToken::new();
        let mut admin = IdentityRole::new("Admin");
        store.roles().create(&mut admin, &cancel).await.unwrap();

        let by_name = store.roles().find_by_name("ADMIN", &cancel).await.unwrap().unwrap();
        assert_eq!(by_name.id, admin.id);
        let by_id = store.roles().find_by_id(&admin.id, &cancel).await.unwrap().unwrap();
        assert_eq!(by_id.name, "Admin");

        let mut again = IdentityRole::new("admin");
        assert!(store.roles().create(&mut again, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn renaming_a_role_is_rejected() {
        let store = stores().await;
        let cancel = CancellationToken::new();
        let mut role = IdentityRole::new("editor");
        store.roles().create(&mut role, &cancel).await.unwrap();

        role.name = "writer".to_string();
        assert!(matches!(
            store.roles().update(&mut role, &cancel).await,
            Err(IdentityError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn membership_round_trip() {
        let store = stores().await;
        let cancel = CancellationToken::new();
        let mut role = IdentityRole::new("reader");
        store.roles().create(&mut role, &cancel).await.unwrap();
        let mut user = IdentityUser::new("alice");
        store.users().create(&mut user, &cancel).await.unwrap();

        store.add_to_role(&user, "reader", &cancel).await.unwrap();
        store.add_to_role(&user, "reader", &cancel).await.unwrap();
        assert!(store.is_in_role(&user, "READER", &cancel).await.unwrap());
        assert_eq!(store.get_roles(&user, &cancel).await.unwrap(), vec!["reader"]);
        assert_eq!(
            store.get_users_for_role("reader", &cancel).await.unwrap().len(),
            1
        );

        store.remove_from_role(&user, "reader", &cancel).await.unwrap();
        store.remove_from_role(&user, "reader", &cancel).await.unwrap();
        assert!(!store.is_in_role(&user, "reader", &cancel).await.unwrap());
        assert!(store.get_users_for_role("reader", &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_role_is_reported() {
        let store = stores().await;
        let cancel = CancellationToken::new();
        let mut user = IdentityUser::new("alice");
        store.users().create(&mut user, &cancel).await.unwrap();
        let err = store.add_to_role(&user, "ghost", &cancel).await.unwrap_err();
        assert!(matches!(err, IdentityError::RoleNotFound(name) if name == "ghost"));
    }
}
