use crate::config::IdentityConfiguration;
use crate::core::{IdentityError, Result};
use crate::store::{RoleStore, UserRoleStore, UserStore};
use crate::table::{TableClient, TableService};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Resolved table handles for one identity configuration.
///
/// Handles are reference counted; stores built from the context keep the
/// tables alive and release them when the last store is dropped.
#[derive(Clone)]
pub struct IdentityCloudContext {
    config: IdentityConfiguration,
    user_table: Arc<dyn TableClient>,
    index_table: Arc<dyn TableClient>,
    role_table: Arc<dyn TableClient>,
}

impl IdentityCloudContext {
    /// Validates `config` and opens its tables through `service`.
    pub fn new(config: IdentityConfiguration, service: &dyn TableService) -> Result<Self> {
        config.validate().map_err(IdentityError::Config)?;

        let user_table = service.table(&config.resolved_user_table());
        let index_table = service.table(&config.resolved_index_table());
        let role_table = service.table(&config.resolved_role_table());
        debug!(
            users = user_table.name(),
            index = index_table.name(),
            roles = role_table.name(),
            "identity tables resolved"
        );

        Ok(Self {
            config,
            user_table,
            index_table,
            role_table,
        })
    }

    pub fn config(&self) -> &IdentityConfiguration {
        &self.config
    }

    pub fn user_table(&self) -> Arc<dyn TableClient> {
        self.user_table.clone()
    }

    pub fn index_table(&self) -> Arc<dyn TableClient> {
        self.index_table.clone()
    }

    pub fn role_table(&self) -> Arc<dyn TableClient> {
        self.role_table.clone()
    }

    pub async fn create_tables_if_not_exist(&self) -> Result<()> {
        try_join_all([
            self.user_table.create_if_not_exists(),
            self.index_table.create_if_not_exists(),
            self.role_table.create_if_not_exists(),
        ])
        .await?;
        Ok(())
    }

    pub fn user_store(&self) -> UserStore {
        UserStore::new(self)
    }

    pub fn role_store(&self) -> RoleStore {
        RoleStore::new(self)
    }

    /// User store with role membership support.
    pub fn user_role_store(&self) -> UserRoleStore {
        UserRoleStore::new(self.user_store(), self.role_store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::InMemoryTableService;

    #[tokio::test]
    async fn creates_prefixed_tables() {
        let service = InMemoryTableService::new();
        let config = IdentityConfiguration::new("UseDevelopmentStorage=true").table_prefix("t1");
        let context = IdentityCloudContext::new(config, &service).unwrap();
        context.create_tables_if_not_exist().await.unwrap();

        assert_eq!(
            service.list_tables().await.unwrap(),
            vec!["t1AspNetIndex", "t1AspNetRoles", "t1AspNetUsers"]
        );
    }

    #[test]
    fn rejects_invalid_configuration() {
        let service = InMemoryTableService::new();
        let err = IdentityCloudContext::new(IdentityConfiguration::default(), &service)
            .err()
            .unwrap();
        assert_eq!(err.code(), "Configuration");
    }
}
