//! Entry points data access code uses to obtain and release the resource of
//! the current transaction.
//!
//! ```text
//! get_resource(ctx, factory, allow_create)
//!   bound holder?         -> reuse its resource (register a synchronization
//!                            for it on first use inside a transaction)
//!   !allow_create         -> IllegalUsage
//!   synchronization active -> create, bind, register (new resource)
//!   external tx active    -> create, bind per branch, register externally
//!   otherwise             -> create, unbound; caller releases it
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::TransactionContext;
use crate::external::{ExternalResourceSynchronization, ExternalTransactionManager};
use crate::holder::ResourceHolder;
use crate::resource::{FactoryKey, FlushMode, Resource, ResourceFactory};
use crate::synchronization::ResourceSynchronization;
use crate::{DataAccessError, DataAccessResult};

/// Resource bound to `context` for `factory`, or a newly created one.
///
/// Within one active synchronization every call returns the same resource.
/// Without an active synchronization (or external transaction) a created
/// resource is returned unbound and the caller must release it, typically via
/// [`release_resource_if_necessary`].
pub async fn get_resource<F: ResourceFactory>(
    context: &TransactionContext,
    factory: &F,
    allow_create: bool,
) -> DataAccessResult<Arc<F::Resource>> {
    let key = factory.factory_key();
    let existing = context.registry().get_resource::<F::Resource>(key)?;

    if let Some(holder) = &existing {
        if let Some(resource) = reuse_bound_resource(context, key, holder)? {
            return Ok(resource);
        }
    }

    if !allow_create {
        return Err(DataAccessError::illegal_usage(format!(
            "No resource bound to context for factory [{key}], \
             and configuration does not allow creation of a new one here"
        )));
    }

    tracing::debug!(%key, "Opening resource");
    let resource = factory
        .create_resource()
        .await
        .map_err(|source| DataAccessError::ResourceUnavailable {
            message: format!("could not open resource for factory [{key}]"),
            source,
        })?;

    if context.config().allow_synchronization {
        let registered = if context.is_synchronization_active() {
            register_new_resource(context, key, &resource)
        } else if let Some(manager) = context.external_transaction_manager() {
            register_with_external(context, Arc::clone(manager), key, &resource, existing)
        } else {
            Ok(())
        };
        if let Err(err) = registered {
            do_close(resource.as_ref()).await;
            return Err(err);
        }
    }
    Ok(resource)
}

fn reuse_bound_resource<R: Resource>(
    context: &TransactionContext,
    key: FactoryKey,
    holder: &Arc<ResourceHolder<R>>,
) -> DataAccessResult<Option<Arc<R>>> {
    if context.is_synchronization_active() {
        let Some(resource) = holder.resource() else {
            return Ok(None);
        };
        if context.config().allow_synchronization && !holder.is_synchronized_with_transaction() {
            tracing::debug!(%key, "Registering transaction synchronization for existing resource");
            let synchronization = ResourceSynchronization::new(context, Arc::clone(holder), key, false)?;
            context.register_synchronization(Arc::new(synchronization))?;
            holder.set_synchronized_with_transaction(true);
            if let Some(deadline) = context.transaction_deadline() {
                holder.set_deadline(deadline);
            }
            let mode = resource.flush_mode();
            if mode == FlushMode::Never {
                resource.set_flush_mode(FlushMode::Auto);
                holder.set_previous_flush_mode(Some(mode));
            }
        }
        holder.requested();
        return Ok(Some(resource));
    }

    if let Some(manager) = context.external_transaction_manager() {
        if manager.status()?.is_active() {
            // One resource per external transaction: a suspended external
            // transaction keeps its own.
            let branch_resource = manager
                .current_branch()?
                .and_then(|branch| holder.resource_for(branch));
            if let Some(resource) = branch_resource {
                holder.requested();
                return Ok(Some(resource));
            }
            return Ok(None);
        }
    }

    let resource = holder.resource();
    if resource.is_some() {
        holder.requested();
    }
    Ok(resource)
}

fn register_new_resource<R: Resource>(
    context: &TransactionContext,
    key: FactoryKey,
    resource: &Arc<R>,
) -> DataAccessResult<()> {
    tracing::debug!(%key, "Registering transaction synchronization for new resource");
    let holder = Arc::new(ResourceHolder::new(Arc::clone(resource)));
    holder.set_synchronized_with_transaction(true);
    holder.requested();
    if let Some(deadline) = context.transaction_deadline() {
        holder.set_deadline(deadline);
    }
    let synchronization = ResourceSynchronization::new(context, Arc::clone(&holder), key, true)?;
    context.registry().bind(key, holder)?;
    if let Err(err) = context.register_synchronization(Arc::new(synchronization)) {
        context.registry().unbind_if_possible::<R>(key);
        return Err(err);
    }
    Ok(())
}

fn register_with_external<R: Resource>(
    context: &TransactionContext,
    manager: Arc<dyn ExternalTransactionManager>,
    key: FactoryKey,
    resource: &Arc<R>,
    existing: Option<Arc<ResourceHolder<R>>>,
) -> DataAccessResult<()> {
    if !manager.status()?.is_active() {
        return Ok(());
    }
    let branch = manager.current_branch()?.ok_or_else(|| {
        DataAccessError::ExternalTransaction("active external transaction reports no branch".into())
    })?;
    tracing::debug!(%key, %branch, "Registering external transaction synchronization for new resource");

    let (holder, new_holder) = match existing {
        Some(holder) => {
            holder.add_resource(branch, Arc::clone(resource));
            (holder, false)
        }
        None => {
            let holder = Arc::new(ResourceHolder::for_branch(branch, Arc::clone(resource)));
            holder.set_synchronized_with_transaction(true);
            (holder, true)
        }
    };

    let synchronization = ResourceSynchronization::new(context, Arc::clone(&holder), key, true)?;
    let registered = manager.register_synchronization(Arc::new(ExternalResourceSynchronization::new(
        synchronization,
        Arc::clone(&manager),
        context.downgrade(),
    )));
    if let Err(err) = registered {
        holder.remove_resource(branch);
        return Err(err);
    }
    if new_holder {
        context.registry().bind(key, holder)?;
    }
    Ok(())
}

/// Release `resource` unless it is owned by the transaction bound to `context`.
///
/// Transaction-owned resources, the ones held by the holder bound for
/// `factory`, are released at completion. Any other resource is closed even
/// while a holder is bound. A failing close is
/// logged and returned as [`DataAccessError::CleanupFailure`]; callers that are
/// already propagating an error should keep theirs.
pub async fn release_resource_if_necessary<F: ResourceFactory>(
    context: &TransactionContext,
    resource: &Arc<F::Resource>,
    factory: &F,
) -> DataAccessResult<()> {
    let key = factory.factory_key();
    if let Some(holder) = context.registry().get_resource::<F::Resource>(key)? {
        if holder.contains_resource(resource) {
            holder.released();
            return Ok(());
        }
    }
    let deferred: Arc<dyn Resource> = Arc::clone(resource) as Arc<dyn Resource>;
    if context.register_deferred_close(key, deferred) {
        return Ok(());
    }
    tracing::debug!(%key, "Closing resource");
    resource.close().await.map_err(|source| {
        tracing::error!(%key, error = %source, "Could not close resource");
        DataAccessError::CleanupFailure { source }
    })
}

/// Obtain the current resource, run `action` with it, and release it again.
///
/// An error from `action` takes precedence over a failure to release.
pub async fn execute_with_resource<F, T, A, Fut>(
    context: &TransactionContext,
    factory: &F,
    action: A,
) -> DataAccessResult<T>
where
    F: ResourceFactory,
    A: FnOnce(Arc<F::Resource>) -> Fut,
    Fut: Future<Output = DataAccessResult<T>>,
{
    let resource = get_resource(context, factory, true).await?;
    let outcome = action(Arc::clone(&resource)).await;
    let released = release_resource_if_necessary(context, &resource, factory).await;
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            tracing::warn!(error = %cleanup, "Release failure suppressed by earlier data access error");
            Err(err)
        }
    }
}

/// Remaining time-to-live of the transaction the bound holder belongs to,
/// for applying as a statement timeout.
pub fn apply_transaction_timeout<F: ResourceFactory>(
    context: &TransactionContext,
    factory: &F,
) -> DataAccessResult<Option<Duration>> {
    let holder = context
        .registry()
        .get_resource::<F::Resource>(factory.factory_key())?;
    Ok(holder.and_then(|holder| holder.time_to_live()))
}

/// Close `resource` now, or queue it if deferred close is active for `key`.
pub(crate) async fn close_resource_or_register_deferred<R: Resource>(
    context: &TransactionContext,
    key: FactoryKey,
    resource: Arc<R>,
) {
    let deferred: Arc<dyn Resource> = Arc::clone(&resource) as Arc<dyn Resource>;
    if !context.register_deferred_close(key, deferred) {
        do_close(resource.as_ref()).await;
    }
}

/// Close failures after completion cannot change the outcome; log them.
pub(crate) async fn do_close<R: Resource + ?Sized>(resource: &R) {
    tracing::debug!("Closing resource");
    if let Err(err) = resource.close().await {
        tracing::error!(error = %err, "Could not close resource");
    }
}
