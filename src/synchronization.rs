use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::accessor::close_resource_or_register_deferred;
use crate::context::TransactionContext;
use crate::holder::{BranchId, ResourceHolder};
use crate::resource::{FactoryKey, FlushMode, Resource};
use crate::{DataAccessError, DataAccessResult};

/// Order of synchronizations that do not care when they run.
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// How a transaction ended, as reported to `after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// Outcome not known, e.g. a heuristic or a failure while completing.
    Unknown,
}

/// Callbacks a transaction driver invokes on registered synchronizations.
///
/// `before_commit` and `commit` may fail and thereby abort the commit.
/// `before_completion` and `after_completion` run after the outcome is
/// decided and must contain their own failures.
#[async_trait]
pub trait TransactionSynchronization: Send + Sync {
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    fn suspend(&self, _context: &TransactionContext) -> DataAccessResult<()> {
        Ok(())
    }

    fn resume(&self, _context: &TransactionContext) -> DataAccessResult<()> {
        Ok(())
    }

    async fn before_commit(&self, _context: &TransactionContext, _read_only: bool) -> DataAccessResult<()> {
        Ok(())
    }

    /// Make the work of the synchronized resource durable. Runs after every
    /// `before_commit` succeeded.
    async fn commit(&self, _context: &TransactionContext) -> DataAccessResult<()> {
        Ok(())
    }

    async fn before_completion(&self, _context: &TransactionContext) {}

    async fn after_completion(&self, _context: &TransactionContext, _status: CompletionStatus) {}
}

/// Lifecycle phase of a [`ResourceSynchronization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynchronizationPhase {
    Active,
    Suspended,
    BeforeCommit,
    BeforeCompletion,
    AfterCompletion,
    Done,
}

#[derive(Debug)]
struct SynchronizationState {
    phase: SynchronizationPhase,
    holder_active: bool,
    // The branch resource was released in before_completion; the holder's
    // default resource belongs to someone else.
    branch_completed: bool,
}

/// Completion callback for one bound resource holder.
///
/// Flushes the resource before commit, unbinds the holder at completion and
/// closes resources this synchronization's accessor call created. Pre-bound
/// resources are never closed; after a rollback their pending changes are
/// cleared so they do not leak into the next use.
pub struct ResourceSynchronization<R: Resource> {
    holder: Arc<ResourceHolder<R>>,
    key: FactoryKey,
    new_resource: bool,
    external_completion: bool,
    branch: Option<BranchId>,
    order: i32,
    state: Mutex<SynchronizationState>,
}

impl<R: Resource> ResourceSynchronization<R> {
    /// Capture the external transaction branch, if an external transaction is
    /// running, so `before_completion` can tell which resource belongs to it.
    pub fn new(
        context: &TransactionContext,
        holder: Arc<ResourceHolder<R>>,
        key: FactoryKey,
        new_resource: bool,
    ) -> DataAccessResult<Self> {
        let branch = match context.external_transaction_manager() {
            Some(manager) if manager.status()?.is_active() => manager.current_branch()?,
            _ => None,
        };
        Ok(Self {
            holder,
            key,
            new_resource,
            external_completion: context.has_external_completion(),
            branch,
            order: context.config().synchronization_order,
            state: Mutex::new(SynchronizationState {
                phase: SynchronizationPhase::Active,
                holder_active: true,
                branch_completed: false,
            }),
        })
    }

    pub fn holder(&self) -> &Arc<ResourceHolder<R>> {
        &self.holder
    }

    pub fn is_new_resource(&self) -> bool {
        self.new_resource
    }

    pub fn phase(&self) -> SynchronizationPhase {
        self.state.lock().phase
    }

    pub fn branch(&self) -> Option<BranchId> {
        self.branch
    }

    fn set_phase(&self, phase: SynchronizationPhase) {
        self.state.lock().phase = phase;
    }

    fn deactivate_holder(&self) {
        self.state.lock().holder_active = false;
    }

    /// Resource of the current external branch, falling back to the default one.
    fn current_resource(&self) -> Option<Arc<R>> {
        self.branch
            .and_then(|branch| self.holder.resource_for(branch))
            .or_else(|| self.holder.resource())
    }

    fn restore_previous_flush_mode(&self, resource: &R) {
        if let Some(mode) = self.holder.previous_flush_mode() {
            resource.set_flush_mode(mode);
        }
    }

    async fn complete_default_resource(&self, context: &TransactionContext, status: CompletionStatus) {
        let Some(resource) = self.holder.resource() else {
            return;
        };
        if !self.external_completion || !self.new_resource {
            let committed = status == CompletionStatus::Committed;
            if let Err(err) = resource.after_transaction_completion(committed).await {
                tracing::error!(key = %self.key, error = %err, "After-completion callback on resource failed");
            }
            if self.new_resource {
                close_resource_or_register_deferred(context, self.key, Arc::clone(&resource)).await;
            }
        }
        if !self.new_resource && status != CompletionStatus::Committed {
            resource.clear();
        }
    }

    /// Returns true when a resource for this synchronization's branch was
    /// found and handled.
    async fn complete_branch(&self, context: &TransactionContext, branch: BranchId) -> bool {
        let Some(resource) = self.holder.remove_resource(branch) else {
            return false;
        };
        if self.holder.is_empty() {
            // Completion may run on a flow that never bound the holder.
            if context.registry().has_resource(self.key) {
                context.registry().unbind_if_possible::<R>(self.key);
            }
            self.deactivate_holder();
        }
        let is_default = self
            .holder
            .resource()
            .is_some_and(|default| Arc::ptr_eq(&default, &resource));
        if is_default {
            self.restore_previous_flush_mode(&resource);
        } else {
            close_resource_or_register_deferred(context, self.key, resource).await;
        }
        true
    }
}

#[async_trait]
impl<R: Resource> TransactionSynchronization for ResourceSynchronization<R> {
    fn order(&self) -> i32 {
        self.order
    }

    fn suspend(&self, context: &TransactionContext) -> DataAccessResult<()> {
        let mut state = self.state.lock();
        if state.holder_active && state.phase == SynchronizationPhase::Active {
            context.registry().unbind::<R>(self.key)?;
            state.phase = SynchronizationPhase::Suspended;
        }
        Ok(())
    }

    fn resume(&self, context: &TransactionContext) -> DataAccessResult<()> {
        let mut state = self.state.lock();
        if state.holder_active && state.phase == SynchronizationPhase::Suspended {
            context.registry().bind(self.key, Arc::clone(&self.holder))?;
            state.phase = SynchronizationPhase::Active;
        }
        Ok(())
    }

    async fn before_commit(&self, _context: &TransactionContext, read_only: bool) -> DataAccessResult<()> {
        self.set_phase(SynchronizationPhase::BeforeCommit);
        if read_only {
            return Ok(());
        }
        let Some(resource) = self.current_resource() else {
            return Ok(());
        };
        if resource.flush_mode() >= FlushMode::Commit {
            tracing::debug!(key = %self.key, "Flushing resource on transaction synchronization");
            resource
                .flush()
                .await
                .map_err(|source| DataAccessError::FlushFailure { source })?;
        }
        Ok(())
    }

    async fn commit(&self, _context: &TransactionContext) -> DataAccessResult<()> {
        let Some(resource) = self.current_resource() else {
            return Ok(());
        };
        resource
            .commit()
            .await
            .map_err(|source| DataAccessError::CommitFailure { source })
    }

    async fn before_completion(&self, context: &TransactionContext) {
        self.set_phase(SynchronizationPhase::BeforeCompletion);
        if let Some(branch) = self.branch {
            if self.complete_branch(context, branch).await {
                self.state.lock().branch_completed = true;
                return;
            }
        }
        if self.new_resource {
            if context.registry().unbind_if_possible::<R>(self.key).is_none() {
                tracing::debug!(key = %self.key, "Resource holder already unbound at completion");
            }
            self.deactivate_holder();
            if self.external_completion {
                // The external manager defers the actual release to its own
                // completion, so hand the resource over now.
                if let Some(resource) = self.holder.resource() {
                    close_resource_or_register_deferred(context, self.key, resource).await;
                }
            }
        } else if let Some(resource) = self.holder.resource() {
            self.restore_previous_flush_mode(&resource);
        }
    }

    async fn after_completion(&self, context: &TransactionContext, status: CompletionStatus) {
        self.set_phase(SynchronizationPhase::AfterCompletion);
        let branch_completed = self.state.lock().branch_completed;
        if !branch_completed {
            self.complete_default_resource(context, status).await;
        }
        if self.holder.does_not_hold_non_default_resource() {
            if self.new_resource || branch_completed {
                self.holder.set_synchronized_with_transaction(false);
            } else {
                // A pre-bound holder outlives the transaction: drop its
                // rollback-only mark and deadline along with the flag.
                self.holder.clear();
            }
        }
        self.set_phase(SynchronizationPhase::Done);
    }
}
