//! Contract of the partitioned backing store and an in-memory implementation.

pub mod client;
pub mod entity;
pub mod filter;
pub mod memory;

pub use client::{
    ContinuationToken, MAX_BATCH_OPERATIONS, MAX_PAGE_SIZE, Page, TableClient, TableQuery,
    TableService, TransactionAction, UpdateMode,
};
pub use entity::{ETag, TableEntity};
pub use filter::{CompareOp, Field, Filter};
pub use memory::{InMemoryTable, InMemoryTableService};
