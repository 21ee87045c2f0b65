use thiserror::Error;

/// Failures reported by a backing table store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity ({partition_key}, {row_key}) not found in table '{table}'")]
    NotFound {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("Entity ({partition_key}, {row_key}) already exists in table '{table}'")]
    EntityExists {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures surfaced to the identity layer.
///
/// Joined writes (create/update/delete) collapse every underlying cause into
/// one coarse variant; callers only see which operation failed.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("User Creation Failed.")]
    CreateFailed,

    #[error("User Update Failed.")]
    UpdateFailed,

    #[error("Delete user failed.")]
    DeleteFailed,

    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    #[error("Role '{0}' not found")]
    RoleNotFound(String),

    #[error("{failed} of {total} batch group(s) failed: {source}")]
    BatchFailed {
        failed: usize,
        total: usize,
        #[source]
        source: StoreError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Short machine code handed to the identity layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CreateFailed => "001",
            Self::UpdateFailed => "002",
            Self::DeleteFailed => "003",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Cancelled => "Cancelled",
            Self::Conflict(_) => "ConcurrencyFailure",
            Self::RoleNotFound(_) => "RoleNotFound",
            Self::BatchFailed { .. } => "BatchFailed",
            Self::Config(_) => "Configuration",
            Self::Store(_) => "StoreFailure",
            Self::Internal(_) => "Internal",
        }
    }

    /// Human readable description paired with [`IdentityError::code`].
    pub fn description(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;
