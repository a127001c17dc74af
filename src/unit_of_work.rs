use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{SuspendedSynchronizations, TransactionContext};
use crate::synchronization::CompletionStatus;
use crate::transaction_aware::{TransactionAware, TransactionAwareSynchronization};
use crate::{TransactionError, TransactionResult};

/// Unit of Work pattern for managing transactions on a context.
///
/// The UnitOfWork opens a synchronization scope on a [`TransactionContext`];
/// resources obtained through the accessor while the scope is open are shared
/// by every call site and released when the session completes.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Session: UnitOfWorkSession;

    /// Begin a new transaction session on `context`.
    async fn begin(&self, context: &TransactionContext) -> TransactionResult<Self::Session>;
}

/// Represents a single transaction session.
///
/// Completing the session drives the registered synchronizations through
/// their completion phases.
#[async_trait]
pub trait UnitOfWorkSession: Send + Sync {
    fn context(&self) -> &TransactionContext;

    /// Register a component that needs to be notified of transaction events.
    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) -> TransactionResult<()>;

    /// Make any later `commit` roll back instead.
    fn set_rollback_only(&self);

    fn is_rollback_only(&self) -> bool;

    /// Commit the transaction and notify all registered synchronizations.
    async fn commit(self) -> TransactionResult<()>;

    /// Rollback the transaction and notify all registered synchronizations.
    async fn rollback(self) -> TransactionResult<()>;
}

/// Default UnitOfWork: a pure synchronization scope with no physical
/// transaction of its own. Resources do their own work in the phases.
#[derive(Debug, Clone, Default)]
pub struct SynchronizedUnitOfWork {
    read_only: bool,
    timeout: Option<Duration>,
}

impl SynchronizedUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only sessions skip the commit-time flush.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Give each transaction begun by this unit of work a deadline
    /// `timeout` after `begin`. Resources bound in the transaction report the
    /// remaining time through [`crate::apply_transaction_timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl UnitOfWork for SynchronizedUnitOfWork {
    type Session = SynchronizedSession;

    async fn begin(&self, context: &TransactionContext) -> TransactionResult<Self::Session> {
        // An enclosing scope is parked until this one completes.
        let suspended = if context.is_synchronization_active() {
            tracing::debug!(context = %context.id(), "Suspending current transaction synchronization");
            Some(context.suspend_synchronization()?)
        } else {
            None
        };
        let initialized = context.init_synchronization().and_then(|()| match self.timeout {
            Some(timeout) => context.set_transaction_timeout(timeout),
            None => Ok(()),
        });
        if let Err(err) = initialized {
            if let Some(suspended) = suspended {
                context.resume_synchronization(suspended)?;
            }
            return Err(err.into());
        }
        Ok(SynchronizedSession {
            context: context.clone(),
            read_only: self.read_only,
            rollback_only: AtomicBool::new(false),
            suspended,
        })
    }
}

/// Session created by [`SynchronizedUnitOfWork`].
#[derive(Debug)]
pub struct SynchronizedSession {
    context: TransactionContext,
    read_only: bool,
    rollback_only: AtomicBool,
    suspended: Option<SuspendedSynchronizations>,
}

impl SynchronizedSession {
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether an enclosing session was suspended by this one.
    pub fn has_suspended_session(&self) -> bool {
        self.suspended.is_some()
    }

    async fn complete(self, status: CompletionStatus) -> TransactionResult<()> {
        self.context.trigger_before_completion().await;
        self.context.trigger_after_completion(status).await;
        self.cleanup_after_completion()
    }

    fn cleanup_after_completion(self) -> TransactionResult<()> {
        self.context.clear_synchronization()?;
        if let Some(suspended) = self.suspended {
            tracing::debug!(context = %self.context.id(), "Resuming suspended transaction synchronization");
            self.context.resume_synchronization(suspended)?;
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkSession for SynchronizedSession {
    fn context(&self) -> &TransactionContext {
        &self.context
    }

    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) -> TransactionResult<()> {
        self.context
            .register_synchronization(Arc::new(TransactionAwareSynchronization::new(observer)))?;
        Ok(())
    }

    fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    async fn commit(self) -> TransactionResult<()> {
        if self.is_rollback_only() || self.context.registry().any_rollback_only() {
            tracing::debug!(context = %self.context.id(), "Transaction marked rollback-only, rolling back on commit");
            self.complete(CompletionStatus::RolledBack).await?;
            return Err(TransactionError::UnexpectedRollback);
        }

        let flushed = self.context.trigger_before_commit(self.read_only).await;
        if let Err(err) = flushed {
            tracing::error!(context = %self.context.id(), error = %err, "beforeCommit failed, rolling back");
            self.complete(CompletionStatus::RolledBack).await?;
            return Err(TransactionError::CommitFailed { source: err });
        }

        // Resources that committed before the failure stay committed.
        let committed = self.context.trigger_commit().await;
        if let Err(err) = committed {
            tracing::error!(context = %self.context.id(), error = %err, "Commit failed, outcome unknown");
            self.complete(CompletionStatus::Unknown).await?;
            return Err(TransactionError::CommitFailed { source: err });
        }

        self.complete(CompletionStatus::Committed).await
    }

    async fn rollback(self) -> TransactionResult<()> {
        self.complete(CompletionStatus::RolledBack).await
    }
}
