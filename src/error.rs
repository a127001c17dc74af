/// Error raised by a resource or resource factory itself.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Resource is already closed")]
    Closed,

    #[error("Provider error: {0}")]
    Provider(String),
}

/// Unified error taxonomy for resource access and synchronization.
#[derive(Debug, thiserror::Error)]
pub enum DataAccessError {
    /// The factory could not create a resource.
    #[error("Could not obtain resource: {message}")]
    ResourceUnavailable {
        message: String,
        #[source]
        source: ResourceError,
    },

    /// API misuse: nothing bound where something was required, or a double bind.
    #[error("Illegal usage: {0}")]
    IllegalUsage(String),

    /// Flushing pending changes before commit failed.
    #[error("Flush failed before commit: {source}")]
    FlushFailure {
        #[source]
        source: ResourceError,
    },

    /// The resource could not make its flushed work durable.
    #[error("Commit of resource failed: {source}")]
    CommitFailure {
        #[source]
        source: ResourceError,
    },

    /// Releasing a resource not owned by a transaction failed.
    #[error("Could not release resource: {source}")]
    CleanupFailure {
        #[source]
        source: ResourceError,
    },

    /// The external transaction manager could not be queried or called.
    #[error("External transaction manager failure: {0}")]
    ExternalTransaction(String),
}

impl DataAccessError {
    pub(crate) fn illegal_usage(message: impl Into<String>) -> Self {
        DataAccessError::IllegalUsage(message.into())
    }
}

/// Error type for the unit-of-work driver.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction commit failed: {source}")]
    CommitFailed {
        #[source]
        source: DataAccessError,
    },

    #[error("Transaction rolled back because it has been marked as rollback-only")]
    UnexpectedRollback,

    #[error(transparent)]
    DataAccess(#[from] DataAccessError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type ResourceResult<T> = Result<T, ResourceError>;

pub type DataAccessResult<T> = Result<T, DataAccessError>;

/// Result type for transaction-aware operations
pub type TransactionResult<T> = Result<T, TransactionError>;
