use async_trait::async_trait;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use crate::accessor::{get_resource, release_resource_if_necessary};
use crate::context::TransactionContext;
use crate::resource::{FlushMode, Resource, ResourceFactory};
use crate::{DataAccessError, DataAccessResult, ResourceError, ResourceResult};

/// Wrapper around a resource factory whose `current_resource` returns the
/// transaction's shared resource instead of a fresh one.
///
/// Everything else reaches the target through `Deref`. Equality and hashing
/// are by wrapper identity: two wrappers around the same factory are
/// distinct.
pub struct TransactionAwareFactory<F: ResourceFactory> {
    proxy_id: Uuid,
    target: Arc<F>,
}

impl<F: ResourceFactory> TransactionAwareFactory<F> {
    pub fn new(target: Arc<F>) -> Self {
        Self {
            proxy_id: Uuid::new_v4(),
            target,
        }
    }

    pub fn target(&self) -> &Arc<F> {
        &self.target
    }

    /// The resource of the current transaction, creating one if needed.
    ///
    /// Closing the returned wrapper only releases the resource when no
    /// transaction owns it.
    pub async fn current_resource(
        &self,
        context: &TransactionContext,
    ) -> DataAccessResult<TransactionAwareResource<F>> {
        let resource = get_resource(context, self.target.as_ref(), true).await?;
        Ok(TransactionAwareResource::new(
            context.clone(),
            Arc::clone(&self.target),
            resource,
        ))
    }
}

impl<F: ResourceFactory> Deref for TransactionAwareFactory<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.target
    }
}

impl<F: ResourceFactory> PartialEq for TransactionAwareFactory<F> {
    fn eq(&self, other: &Self) -> bool {
        self.proxy_id == other.proxy_id
    }
}

impl<F: ResourceFactory> Eq for TransactionAwareFactory<F> {}

impl<F: ResourceFactory> Hash for TransactionAwareFactory<F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.proxy_id.hash(state);
    }
}

impl<F: ResourceFactory> fmt::Debug for TransactionAwareFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionAwareFactory")
            .field("proxy_id", &self.proxy_id)
            .field("factory_key", &self.target.factory_key())
            .finish()
    }
}

/// Resource handed out by [`TransactionAwareFactory::current_resource`].
///
/// Forwards every call to the wrapped resource except `close`, which goes
/// through [`release_resource_if_necessary`] and is therefore suppressed
/// while a transaction owns the resource.
pub struct TransactionAwareResource<F: ResourceFactory> {
    proxy_id: Uuid,
    context: TransactionContext,
    factory: Arc<F>,
    target: Arc<F::Resource>,
}

impl<F: ResourceFactory> TransactionAwareResource<F> {
    fn new(context: TransactionContext, factory: Arc<F>, target: Arc<F::Resource>) -> Self {
        Self {
            proxy_id: Uuid::new_v4(),
            context,
            factory,
            target,
        }
    }

    /// The wrapped resource itself.
    pub fn target(&self) -> &Arc<F::Resource> {
        &self.target
    }
}

impl<F: ResourceFactory> Deref for TransactionAwareResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        &self.target
    }
}

#[async_trait]
impl<F: ResourceFactory> Resource for TransactionAwareResource<F> {
    fn flush_mode(&self) -> FlushMode {
        self.target.flush_mode()
    }

    fn set_flush_mode(&self, mode: FlushMode) {
        self.target.set_flush_mode(mode);
    }

    async fn flush(&self) -> ResourceResult<()> {
        self.target.flush().await
    }

    fn clear(&self) {
        self.target.clear();
    }

    async fn commit(&self) -> ResourceResult<()> {
        self.target.commit().await
    }

    async fn after_transaction_completion(&self, committed: bool) -> ResourceResult<()> {
        self.target.after_transaction_completion(committed).await
    }

    async fn close(&self) -> ResourceResult<()> {
        match release_resource_if_necessary(&self.context, &self.target, self.factory.as_ref()).await {
            Ok(()) => Ok(()),
            Err(DataAccessError::CleanupFailure { source }) => Err(source),
            Err(err) => Err(ResourceError::Provider(err.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.target.is_open()
    }
}

impl<F: ResourceFactory> PartialEq for TransactionAwareResource<F> {
    fn eq(&self, other: &Self) -> bool {
        self.proxy_id == other.proxy_id
    }
}

impl<F: ResourceFactory> Eq for TransactionAwareResource<F> {}

impl<F: ResourceFactory> Hash for TransactionAwareResource<F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.proxy_id.hash(state);
    }
}

impl<F: ResourceFactory> fmt::Debug for TransactionAwareResource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionAwareResource")
            .field("proxy_id", &self.proxy_id)
            .field("context", &self.context.id())
            .finish()
    }
}
