// ============================================================================
// table-identity
// ============================================================================

pub mod config;
pub mod context;
pub mod core;
pub mod keys;
pub mod model;
pub mod prelude;
pub mod store;
pub mod table;

// Re-export main types for convenience
pub use crate::config::IdentityConfiguration;
pub use crate::context::IdentityCloudContext;
pub use crate::core::{IdentityError, Result, StoreError, StoreResult, Value};
pub use crate::keys::{KeyCategory, KeyHelper};

// Re-export the store API
pub use crate::store::{
    BatchOperationHelper, FanoutOptions, IndexKey, IndexStore, RoleStore, UserAggregate,
    UserRoleStore, UserStore,
};

// Re-export the backing table contract
pub use crate::table::{ETag, Filter, InMemoryTableService, TableClient, TableEntity, TableService};

pub use tokio_util::sync::CancellationToken;
