use parking_lot::Mutex;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

use crate::holder::{BoundHolder, ResourceHolder};
use crate::resource::{FactoryKey, Resource};
use crate::{DataAccessError, DataAccessResult};

/// Map from factory identity to the holder bound for it within one
/// transaction context.
///
/// At most one holder is bound per key. Binding is not reentrant: callers
/// check [`ResourceRegistry::has_resource`] or use the accessor functions.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    holders: Mutex<HashMap<FactoryKey, Arc<dyn BoundHolder>>>,
}

fn downcast<R: Resource>(
    key: FactoryKey,
    holder: Arc<dyn BoundHolder>,
) -> DataAccessResult<Arc<ResourceHolder<R>>> {
    holder.into_any().downcast::<ResourceHolder<R>>().map_err(|_| {
        DataAccessError::illegal_usage(format!(
            "Holder bound for key [{key}] does not hold resources of type [{}]",
            type_name::<R>()
        ))
    })
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a holder of any type is bound for `key`.
    pub fn has_resource(&self, key: FactoryKey) -> bool {
        self.holders.lock().contains_key(&key)
    }

    /// Holder bound for `key`, if any.
    ///
    /// Fails only when the bound holder wraps a different resource type.
    pub fn get_resource<R: Resource>(
        &self,
        key: FactoryKey,
    ) -> DataAccessResult<Option<Arc<ResourceHolder<R>>>> {
        let bound = self.holders.lock().get(&key).cloned();
        match bound {
            Some(holder) => {
                let holder = downcast::<R>(key, holder)?;
                tracing::trace!(%key, "Retrieved bound resource holder");
                Ok(Some(holder))
            }
            None => Ok(None),
        }
    }

    /// Bind `holder` for `key`.
    ///
    /// Fails with [`DataAccessError::IllegalUsage`] if a holder is already
    /// bound for the key.
    pub fn bind<R: Resource>(
        &self,
        key: FactoryKey,
        holder: Arc<ResourceHolder<R>>,
    ) -> DataAccessResult<()> {
        let mut holders = self.holders.lock();
        if let Some(existing) = holders.get(&key) {
            return Err(DataAccessError::illegal_usage(format!(
                "Already holder [{existing:?}] for key [{key}] bound to context"
            )));
        }
        holders.insert(key, holder);
        tracing::debug!(%key, "Bound resource holder to context");
        Ok(())
    }

    /// Remove and return the holder bound for `key`.
    ///
    /// Fails if nothing is bound or the bound holder has another resource
    /// type, in which case it stays bound.
    pub fn unbind<R: Resource>(&self, key: FactoryKey) -> DataAccessResult<Arc<ResourceHolder<R>>> {
        let mut holders = self.holders.lock();
        let holder = holders.remove(&key).ok_or_else(|| {
            DataAccessError::illegal_usage(format!("No holder for key [{key}] bound to context"))
        })?;
        match downcast::<R>(key, Arc::clone(&holder)) {
            Ok(typed) => {
                tracing::debug!(%key, "Removed resource holder from context");
                Ok(typed)
            }
            Err(err) => {
                holders.insert(key, holder);
                Err(err)
            }
        }
    }

    /// Like [`ResourceRegistry::unbind`] but tolerant of absence.
    ///
    /// A holder of a different resource type stays bound.
    pub fn unbind_if_possible<R: Resource>(&self, key: FactoryKey) -> Option<Arc<ResourceHolder<R>>> {
        let mut holders = self.holders.lock();
        let holder = holders.get(&key).cloned()?;
        let typed = downcast::<R>(key, holder).ok()?;
        holders.remove(&key);
        tracing::debug!(%key, "Removed resource holder from context");
        Some(typed)
    }

    /// Whether any bound holder has been marked rollback-only.
    pub fn any_rollback_only(&self) -> bool {
        self.holders
            .lock()
            .values()
            .any(|holder| holder.is_rollback_only())
    }

    /// Snapshot of the bound keys, in no particular order.
    pub fn keys(&self) -> Vec<FactoryKey> {
        self.holders.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.holders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.lock().is_empty()
    }
}
