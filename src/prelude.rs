//! Everything an application needs to wire up and use the identity stores.
//!
//! `use table_identity::prelude::*;` brings in the context, the stores, the
//! records they return and the error type.

pub use crate::config::IdentityConfiguration;
pub use crate::context::IdentityCloudContext;
pub use crate::core::{IdentityError, Result};
pub use crate::model::{Claim, IdentityRole, IdentityUser, UserLoginInfo};
pub use crate::store::{RoleStore, UserAggregate, UserRoleStore, UserStore};
pub use crate::table::{InMemoryTableService, TableService};
pub use tokio_util::sync::CancellationToken;
