use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::resource::{FlushMode, Resource};

/// Identity of one external transaction branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchId(Uuid);

impl BranchId {
    /// Fresh random branch id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an id assigned by the external transaction manager.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch-{}", self.0)
    }
}

/// Slot a resource occupies inside a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKey {
    Default,
    Branch(BranchId),
}

#[derive(Debug, Default)]
struct HolderState {
    rollback_only: bool,
    synchronized_with_transaction: bool,
    reference_count: usize,
    previous_flush_mode: Option<FlushMode>,
    deadline: Option<Instant>,
}

/// Mutable wrapper around the resource(s) bound for one factory.
///
/// Normally holds a single default resource. When an external transaction
/// manager suspends and resumes transactions on its own, each external branch
/// gets its own resource under [`HolderKey::Branch`].
///
/// Holders are shared as `Arc<ResourceHolder<R>>`; every participant sees the
/// same flags, so a rollback-only mark set by one call site is visible to all.
pub struct ResourceHolder<R: Resource> {
    resources: Mutex<HashMap<HolderKey, Arc<R>>>,
    state: Mutex<HolderState>,
}

impl<R: Resource> ResourceHolder<R> {
    /// Holder with `resource` as its default resource.
    pub fn new(resource: Arc<R>) -> Self {
        Self::with_key(HolderKey::Default, resource)
    }

    /// Holder whose only resource belongs to `branch`.
    pub fn for_branch(branch: BranchId, resource: Arc<R>) -> Self {
        Self::with_key(HolderKey::Branch(branch), resource)
    }

    fn with_key(key: HolderKey, resource: Arc<R>) -> Self {
        let mut resources = HashMap::new();
        resources.insert(key, resource);
        Self {
            resources: Mutex::new(resources),
            state: Mutex::new(HolderState::default()),
        }
    }

    /// The default resource, if one is held.
    pub fn resource(&self) -> Option<Arc<R>> {
        self.resources.lock().get(&HolderKey::Default).cloned()
    }

    /// The resource bound for `branch`, without falling back to the default.
    pub fn resource_for(&self, branch: BranchId) -> Option<Arc<R>> {
        self.resources.lock().get(&HolderKey::Branch(branch)).cloned()
    }

    /// The default resource if present, else an arbitrary branch resource.
    pub fn any_resource(&self) -> Option<Arc<R>> {
        let resources = self.resources.lock();
        resources
            .get(&HolderKey::Default)
            .or_else(|| resources.values().next())
            .cloned()
    }

    /// Hold `resource` for `branch`, replacing any previous one.
    pub fn add_resource(&self, branch: BranchId, resource: Arc<R>) {
        self.resources.lock().insert(HolderKey::Branch(branch), resource);
    }

    /// Take the resource of `branch` out of the holder.
    pub fn remove_resource(&self, branch: BranchId) -> Option<Arc<R>> {
        self.resources.lock().remove(&HolderKey::Branch(branch))
    }

    /// Whether `resource` itself (by identity) is held in any slot.
    pub fn contains_resource(&self, resource: &Arc<R>) -> bool {
        self.resources
            .lock()
            .values()
            .any(|held| Arc::ptr_eq(held, resource))
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    /// True when nothing but (at most) the default resource is held.
    pub fn does_not_hold_non_default_resource(&self) -> bool {
        let resources = self.resources.lock();
        resources.is_empty()
            || (resources.len() == 1 && resources.contains_key(&HolderKey::Default))
    }

    /// Mark the transaction the holder takes part in for rollback.
    pub fn set_rollback_only(&self) {
        self.state.lock().rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.state.lock().rollback_only
    }

    /// Whether a synchronization has been registered for the holder in the
    /// current transaction.
    pub fn set_synchronized_with_transaction(&self, synchronized: bool) {
        self.state.lock().synchronized_with_transaction = synchronized;
    }

    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.state.lock().synchronized_with_transaction
    }

    /// Flush mode to restore at completion, when the transaction raised it.
    pub fn set_previous_flush_mode(&self, mode: Option<FlushMode>) {
        self.state.lock().previous_flush_mode = mode;
    }

    pub fn previous_flush_mode(&self) -> Option<FlushMode> {
        self.state.lock().previous_flush_mode
    }

    /// Register one more call site using the holder.
    pub fn requested(&self) {
        self.state.lock().reference_count += 1;
    }

    /// A call site is done with the holder.
    pub fn released(&self) {
        let mut state = self.state.lock();
        state.reference_count = state.reference_count.saturating_sub(1);
    }

    /// Whether some call site still uses the holder.
    pub fn is_open(&self) -> bool {
        self.state.lock().reference_count > 0
    }

    /// Number of call sites currently using the holder.
    pub fn reference_count(&self) -> usize {
        self.state.lock().reference_count
    }

    /// Set the deadline `timeout` from now.
    pub fn set_timeout(&self, timeout: Duration) {
        self.set_deadline(Instant::now() + timeout);
    }

    /// Set the deadline of the transaction this holder takes part in.
    pub fn set_deadline(&self, deadline: Instant) {
        self.state.lock().deadline = Some(deadline);
    }

    /// Whether a transaction deadline is set.
    pub fn has_timeout(&self) -> bool {
        self.state.lock().deadline.is_some()
    }

    /// Remaining time before the transaction deadline; zero once it has passed.
    pub fn time_to_live(&self) -> Option<Duration> {
        self.state
            .lock()
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Reset transactional state. Held resources and the reference count stay.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.rollback_only = false;
        state.synchronized_with_transaction = false;
        state.previous_flush_mode = None;
        state.deadline = None;
    }
}

impl<R: Resource> fmt::Debug for ResourceHolder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<HolderKey> = self.resources.lock().keys().copied().collect();
        f.debug_struct("ResourceHolder")
            .field("keys", &keys)
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Type-erased view of a holder, as stored in the registry.
pub trait BoundHolder: fmt::Debug + Send + Sync + 'static {
    fn is_rollback_only(&self) -> bool;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<R: Resource> BoundHolder for ResourceHolder<R> {
    fn is_rollback_only(&self) -> bool {
        ResourceHolder::is_rollback_only(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
