use async_trait::async_trait;
use std::sync::Arc;

use crate::context::TransactionContext;
use crate::synchronization::{CompletionStatus, TransactionSynchronization, LOWEST_PRECEDENCE};
use crate::TransactionResult;

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Components implementing this trait can be registered with a UnitOfWorkSession
/// to receive callbacks when the transaction is committed or rolled back.
/// This allows repositories and other components to perform cleanup operations,
/// update caches, or handle other post-transaction tasks.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after a successful transaction commit.
    async fn on_commit(&self) -> TransactionResult<()>;

    /// Called after a transaction rollback.
    ///
    /// Implementations should use this to revert any in-memory state changes
    /// that were made during the transaction.
    async fn on_rollback(&self) -> TransactionResult<()>;
}

/// Runs a [`TransactionAware`] observer as an after-completion synchronization.
///
/// Observers run after resource synchronizations, so they see resources
/// already flushed and released. Observer failures are logged.
pub struct TransactionAwareSynchronization {
    observer: Arc<dyn TransactionAware>,
}

impl TransactionAwareSynchronization {
    pub fn new(observer: Arc<dyn TransactionAware>) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl TransactionSynchronization for TransactionAwareSynchronization {
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    async fn after_completion(&self, _context: &TransactionContext, status: CompletionStatus) {
        let outcome = match status {
            CompletionStatus::Committed => self.observer.on_commit().await,
            CompletionStatus::RolledBack => self.observer.on_rollback().await,
            CompletionStatus::Unknown => {
                tracing::warn!("Transaction outcome unknown; observer not notified");
                Ok(())
            }
        };
        if let Err(err) = outcome {
            tracing::error!(error = %err, ?status, "Transaction-aware observer failed after completion");
        }
    }
}
