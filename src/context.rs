use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::SynchronizationConfig;
use crate::external::ExternalTransactionManager;
use crate::registry::ResourceRegistry;
use crate::resource::{FactoryKey, Resource};
use crate::synchronization::{CompletionStatus, TransactionSynchronization};
use crate::{DataAccessError, DataAccessResult};

struct ContextInner {
    id: Uuid,
    config: SynchronizationConfig,
    registry: ResourceRegistry,
    synchronizations: Mutex<Option<Vec<Arc<dyn TransactionSynchronization>>>>,
    deadline: Mutex<Option<Instant>>,
    external: Option<Arc<dyn ExternalTransactionManager>>,
    deferred_close: Mutex<HashMap<FactoryKey, Vec<Arc<dyn Resource>>>>,
}

/// Handle to one logical flow of control and the transaction running on it.
///
/// Every accessor call takes the context explicitly; nothing is looked up
/// from the current thread. Cloning is cheap and yields a handle to the
/// same context. Independent contexts share no state.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<ContextInner>,
}

/// Non-owning handle, for callbacks registered outside the context.
#[derive(Clone)]
pub struct WeakTransactionContext {
    inner: Weak<ContextInner>,
}

impl WeakTransactionContext {
    pub fn upgrade(&self) -> Option<TransactionContext> {
        self.inner.upgrade().map(|inner| TransactionContext { inner })
    }
}

/// Synchronizations parked by [`TransactionContext::suspend_synchronization`].
#[must_use = "suspended synchronizations must be handed back to resume_synchronization"]
pub struct SuspendedSynchronizations {
    synchronizations: Vec<Arc<dyn TransactionSynchronization>>,
    deadline: Option<Instant>,
}

impl SuspendedSynchronizations {
    pub fn len(&self) -> usize {
        self.synchronizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synchronizations.is_empty()
    }
}

impl fmt::Debug for SuspendedSynchronizations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedSynchronizations")
            .field("count", &self.synchronizations.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[derive(Default)]
pub struct TransactionContextBuilder {
    config: SynchronizationConfig,
    external: Option<Arc<dyn ExternalTransactionManager>>,
}

impl TransactionContextBuilder {
    pub fn config(mut self, config: SynchronizationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn external_transaction_manager(mut self, manager: Arc<dyn ExternalTransactionManager>) -> Self {
        self.external = Some(manager);
        self
    }

    pub fn build(self) -> TransactionContext {
        TransactionContext {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                config: self.config,
                registry: ResourceRegistry::new(),
                synchronizations: Mutex::new(None),
                deadline: Mutex::new(None),
                external: self.external,
                deferred_close: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_config(config: SynchronizationConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> TransactionContextBuilder {
        TransactionContextBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &SynchronizationConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.inner.registry
    }

    pub fn external_transaction_manager(&self) -> Option<&Arc<dyn ExternalTransactionManager>> {
        self.inner.external.as_ref()
    }

    /// Whether the external transaction manager will release new resources
    /// at its own completion point.
    pub fn has_external_completion(&self) -> bool {
        self.inner.config.external_completion && self.inner.external.is_some()
    }

    pub fn downgrade(&self) -> WeakTransactionContext {
        WeakTransactionContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // Synchronization management

    pub fn is_synchronization_active(&self) -> bool {
        self.inner.synchronizations.lock().is_some()
    }

    pub fn init_synchronization(&self) -> DataAccessResult<()> {
        let mut synchronizations = self.inner.synchronizations.lock();
        if synchronizations.is_some() {
            return Err(DataAccessError::illegal_usage(
                "Cannot activate transaction synchronization - already active",
            ));
        }
        tracing::debug!(context = %self.inner.id, "Initializing transaction synchronization");
        *synchronizations = Some(Vec::new());
        Ok(())
    }

    pub fn register_synchronization(
        &self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> DataAccessResult<()> {
        match self.inner.synchronizations.lock().as_mut() {
            Some(list) => {
                list.push(synchronization);
                Ok(())
            }
            None => Err(DataAccessError::illegal_usage(
                "Transaction synchronization is not active",
            )),
        }
    }

    /// Snapshot of the registered synchronizations, sorted by order.
    pub fn synchronizations(&self) -> DataAccessResult<Vec<Arc<dyn TransactionSynchronization>>> {
        let mut list = self
            .inner
            .synchronizations
            .lock()
            .clone()
            .ok_or_else(|| DataAccessError::illegal_usage("Transaction synchronization is not active"))?;
        list.sort_by_key(|synchronization| synchronization.order());
        Ok(list)
    }

    pub fn clear_synchronization(&self) -> DataAccessResult<()> {
        let mut synchronizations = self.inner.synchronizations.lock();
        if synchronizations.is_none() {
            return Err(DataAccessError::illegal_usage(
                "Cannot deactivate transaction synchronization - not active",
            ));
        }
        tracing::debug!(context = %self.inner.id, "Clearing transaction synchronization");
        *synchronizations = None;
        *self.inner.deadline.lock() = None;
        Ok(())
    }

    /// Give the active transaction a deadline `timeout` from now. Holders
    /// bound for it from then on carry the deadline.
    pub fn set_transaction_timeout(&self, timeout: Duration) -> DataAccessResult<()> {
        if !self.is_synchronization_active() {
            return Err(DataAccessError::illegal_usage(
                "Cannot set transaction timeout - synchronization not active",
            ));
        }
        *self.inner.deadline.lock() = Some(Instant::now() + timeout);
        Ok(())
    }

    /// Deadline of the active transaction, if it has a timeout.
    pub fn transaction_deadline(&self) -> Option<Instant> {
        *self.inner.deadline.lock()
    }

    /// Suspend every registered synchronization and deactivate synchronization,
    /// leaving the context free for another transaction.
    pub fn suspend_synchronization(&self) -> DataAccessResult<SuspendedSynchronizations> {
        let synchronizations = self.synchronizations()?;
        for synchronization in &synchronizations {
            synchronization.suspend(self)?;
        }
        let deadline = self.transaction_deadline();
        self.clear_synchronization()?;
        Ok(SuspendedSynchronizations {
            synchronizations,
            deadline,
        })
    }

    /// Reactivate synchronization with a previously suspended set.
    pub fn resume_synchronization(&self, suspended: SuspendedSynchronizations) -> DataAccessResult<()> {
        self.init_synchronization()?;
        *self.inner.deadline.lock() = suspended.deadline;
        for synchronization in suspended.synchronizations {
            synchronization.resume(self)?;
            self.register_synchronization(synchronization)?;
        }
        Ok(())
    }

    // Completion phases, in the order a transaction driver fires them

    /// Runs `before_commit` on every synchronization; the first failure
    /// aborts the commit and is returned.
    pub async fn trigger_before_commit(&self, read_only: bool) -> DataAccessResult<()> {
        tracing::debug!(context = %self.inner.id, "Triggering beforeCommit synchronization");
        for synchronization in self.synchronizations()? {
            synchronization.before_commit(self, read_only).await?;
        }
        Ok(())
    }

    /// Runs `commit` on every synchronization once all of them flushed; the
    /// first failure is returned and the rest are not committed.
    pub async fn trigger_commit(&self) -> DataAccessResult<()> {
        tracing::debug!(context = %self.inner.id, "Triggering commit synchronization");
        for synchronization in self.synchronizations()? {
            synchronization.commit(self).await?;
        }
        Ok(())
    }

    pub async fn trigger_before_completion(&self) {
        tracing::debug!(context = %self.inner.id, "Triggering beforeCompletion synchronization");
        for synchronization in self.synchronizations().unwrap_or_default() {
            synchronization.before_completion(self).await;
        }
    }

    pub async fn trigger_after_completion(&self, status: CompletionStatus) {
        tracing::debug!(context = %self.inner.id, ?status, "Triggering afterCompletion synchronization");
        for synchronization in self.synchronizations().unwrap_or_default() {
            synchronization.after_completion(self, status).await;
        }
    }

    // Deferred close

    pub fn is_deferred_close_active(&self, key: FactoryKey) -> bool {
        self.inner.deferred_close.lock().contains_key(&key)
    }

    /// Start collecting closes for `key` instead of performing them.
    pub fn init_deferred_close(&self, key: FactoryKey) {
        tracing::debug!(%key, "Initializing deferred close of resources");
        self.inner.deferred_close.lock().insert(key, Vec::new());
    }

    /// Queue `resource` for deferred close. Returns false when deferred close
    /// is not active for `key`, in which case the caller closes it.
    pub(crate) fn register_deferred_close(&self, key: FactoryKey, resource: Arc<dyn Resource>) -> bool {
        let mut deferred = self.inner.deferred_close.lock();
        match deferred.get_mut(&key) {
            Some(resources) => {
                if !resources.iter().any(|queued| Arc::ptr_eq(queued, &resource)) {
                    tracing::debug!(%key, "Registering resource for deferred close");
                    resources.push(resource);
                }
                true
            }
            None => false,
        }
    }

    /// Close every resource queued for `key` and end deferred close for it.
    ///
    /// Close failures are logged; the remaining resources are still closed.
    pub async fn process_deferred_close(&self, key: FactoryKey) -> DataAccessResult<()> {
        let resources = self.inner.deferred_close.lock().remove(&key).ok_or_else(|| {
            DataAccessError::illegal_usage(format!("Deferred close not active for key [{key}]"))
        })?;
        tracing::debug!(%key, count = resources.len(), "Processing deferred close of resources");
        for resource in resources {
            crate::accessor::do_close(resource.as_ref()).await;
        }
        Ok(())
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("synchronization_active", &self.is_synchronization_active())
            .field("external", &self.inner.external.is_some())
            .finish()
    }
}
