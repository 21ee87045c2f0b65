//! Identity stores built on top of a partitioned table.

pub mod aggregate;
pub mod batch;
pub mod fanout;
pub mod index;
pub mod roles;
pub mod user_store;

pub use aggregate::{RowKind, UserAggregate};
pub use batch::BatchOperationHelper;
pub use fanout::{FanoutOptions, FanoutQuery, FetchedUser};
pub use index::{IndexKey, IndexStore, OwnerPage};
pub use roles::{RoleStore, UserRoleStore};
pub use user_store::{UserPage, UserStore};

use crate::core::{IdentityError, Result, StoreResult};
use crate::keys::KeyCategory;
use crate::table::{Filter, TableQuery};
use tokio_util::sync::CancellationToken;

/// Fails with [`IdentityError::Cancelled`] once `cancel` has fired.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IdentityError::Cancelled);
    }
    Ok(())
}

/// Treats a missing row as already deleted.
pub(crate) fn ignore_missing(result: StoreResult<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}

/// Rows of one key category inside a user's partition.
pub(crate) fn category_rows(user_key: &str, category: KeyCategory) -> TableQuery {
    TableQuery::new(
        Filter::partition_eq(user_key)
            .and(Filter::row_range(category.prefix(), category.upper_bound())),
    )
}
