//! Unit of Work synchronization
//!
//! Shares one persistence session per factory between every call site of a
//! logical transaction. Resources are bound to an explicit
//! [`TransactionContext`], reused by nested data access calls, and flushed,
//! unbound and released by completion callbacks the transaction driver fires.

pub mod accessor;
pub mod config;
pub mod context;
pub mod error;
pub mod external;
pub mod holder;
pub mod postgres;
pub mod proxy;
pub mod registry;
pub mod resource;
pub mod synchronization;
pub mod transaction_aware;
pub mod unit_of_work;

pub use accessor::{apply_transaction_timeout, execute_with_resource, get_resource, release_resource_if_necessary};
pub use config::SynchronizationConfig;
pub use context::{SuspendedSynchronizations, TransactionContext, TransactionContextBuilder, WeakTransactionContext};
pub use error::{
    DataAccessError, DataAccessResult, ResourceError, ResourceResult, TransactionError, TransactionResult,
};
pub use external::{ExternalStatus, ExternalSynchronization, ExternalTransactionManager};
pub use holder::{BranchId, HolderKey, ResourceHolder};
pub use postgres::{PendingStatement, PgSession, PgSessionFactory, PgValue};
pub use proxy::{TransactionAwareFactory, TransactionAwareResource};
pub use registry::ResourceRegistry;
pub use resource::{FactoryKey, FlushMode, Resource, ResourceFactory};
pub use synchronization::{CompletionStatus, ResourceSynchronization, SynchronizationPhase, TransactionSynchronization};
pub use transaction_aware::{TransactionAware, TransactionAwareSynchronization};
pub use unit_of_work::{SynchronizedSession, SynchronizedUnitOfWork, UnitOfWork, UnitOfWorkSession};
