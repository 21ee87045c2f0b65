pub mod error;
pub mod value;

pub use error::{IdentityError, Result, StoreError, StoreResult};
pub use value::Value;
