//! Typed records stored in the user, index and role tables.

pub mod mapper;

mod claim;
mod index;
mod login;
mod role;
mod token;
mod user;

pub use claim::{Claim, IdentityUserClaim};
pub use index::IdentityUserIndex;
pub use login::{IdentityUserLogin, UserLoginInfo};
pub use mapper::{RowMeta, TableRecord};
pub use role::{IdentityRole, IdentityUserRole};
pub use token::IdentityUserToken;
pub use user::IdentityUser;
