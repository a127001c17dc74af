use async_trait::async_trait;
use std::sync::Arc;

use crate::context::WeakTransactionContext;
use crate::holder::BranchId;
use crate::resource::Resource;
use crate::synchronization::{CompletionStatus, ResourceSynchronization, TransactionSynchronization};
use crate::DataAccessResult;

/// Status of the transaction an external manager is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalStatus {
    Active,
    MarkedRollback,
    Preparing,
    Committing,
    RollingBack,
    Committed,
    RolledBack,
    NoTransaction,
    Unknown,
}

impl ExternalStatus {
    /// Whether resources may still be enlisted in the transaction.
    pub fn is_active(self) -> bool {
        matches!(self, ExternalStatus::Active | ExternalStatus::MarkedRollback)
    }
}

/// Completion callback registered with an external transaction manager.
#[async_trait]
pub trait ExternalSynchronization: Send + Sync {
    async fn before_completion(&self);

    async fn after_completion(&self, status: CompletionStatus);
}

/// A transaction manager outside this engine (JTA-style) that may suspend
/// and resume its transactions independently of the transaction context.
///
/// Each running external transaction is identified by a [`BranchId`].
pub trait ExternalTransactionManager: Send + Sync + 'static {
    fn status(&self) -> DataAccessResult<ExternalStatus>;

    /// Branch of the transaction currently associated with the caller.
    fn current_branch(&self) -> DataAccessResult<Option<BranchId>>;

    fn register_synchronization(&self, synchronization: Arc<dyn ExternalSynchronization>) -> DataAccessResult<()>;

    fn set_rollback_only(&self) -> DataAccessResult<()>;
}

/// Drives a [`ResourceSynchronization`] from an external manager's two
/// completion callbacks.
///
/// The external `before_completion` is the last point to flush, so it runs
/// the commit-time flush and commits the resource, and marks the external
/// transaction rollback-only if either fails. The external
/// `after_completion` runs the engine's before- and after-completion phases
/// back to back.
pub(crate) struct ExternalResourceSynchronization<R: Resource> {
    synchronization: ResourceSynchronization<R>,
    manager: Arc<dyn ExternalTransactionManager>,
    context: WeakTransactionContext,
}

impl<R: Resource> ExternalResourceSynchronization<R> {
    pub(crate) fn new(
        synchronization: ResourceSynchronization<R>,
        manager: Arc<dyn ExternalTransactionManager>,
        context: WeakTransactionContext,
    ) -> Self {
        Self {
            synchronization,
            manager,
            context,
        }
    }
}

#[async_trait]
impl<R: Resource> ExternalSynchronization for ExternalResourceSynchronization<R> {
    async fn before_completion(&self) {
        let Some(context) = self.context.upgrade() else {
            tracing::warn!("Transaction context dropped before external completion");
            return;
        };
        let mut prepared = self.synchronization.before_commit(&context, false).await;
        if prepared.is_ok() && !matches!(self.manager.status(), Ok(ExternalStatus::MarkedRollback)) {
            prepared = self.synchronization.commit(&context).await;
        }
        if let Err(err) = prepared {
            tracing::error!(error = %err, "Flush or commit failed during external completion");
            if let Err(err) = self.manager.set_rollback_only() {
                tracing::error!(error = %err, "Could not mark external transaction rollback-only");
            }
        }
    }

    async fn after_completion(&self, status: CompletionStatus) {
        let Some(context) = self.context.upgrade() else {
            tracing::warn!("Transaction context dropped before external completion");
            return;
        };
        self.synchronization.before_completion(&context).await;
        self.synchronization.after_completion(&context, status).await;
    }
}
