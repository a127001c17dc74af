use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::ResourceResult;

/// Identity of a resource factory, used as the registry key.
///
/// Two factories sharing a key share bound resources, which is how a
/// transaction-aware wrapper participates in its target's transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryKey(Uuid);

impl FactoryKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactoryKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "factory-{}", self.0)
    }
}

/// When a resource writes its pending changes out.
///
/// Ordered from least to most eager, so `mode >= FlushMode::Commit` means
/// "flushes at commit time at the latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlushMode {
    /// Only flushed by explicit calls.
    Never,
    /// Flushed when the transaction commits.
    Commit,
    /// Flushed at commit and whenever the provider sees fit.
    Auto,
    /// Flushed after every operation.
    Always,
}

/// A persistence session: one unit-of-work handle.
///
/// Resources are shared through `Arc` between every call site of a
/// transaction, so all methods take `&self`.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    fn flush_mode(&self) -> FlushMode;

    fn set_flush_mode(&self, mode: FlushMode);

    /// Write pending changes to the underlying store.
    async fn flush(&self) -> ResourceResult<()>;

    /// Discard the pending in-memory change set.
    fn clear(&self);

    /// Make the flushed work durable.
    ///
    /// Runs once the transaction has decided to commit, after the
    /// commit-time flush and before any completion callback. A failure turns
    /// the commit into an error. Resources without a physical transaction of
    /// their own keep the default.
    async fn commit(&self) -> ResourceResult<()> {
        Ok(())
    }

    /// Tell the resource how its transaction ended, so it can release
    /// transaction-scoped locks and state accordingly. The outcome is final
    /// by then; failures are only logged.
    async fn after_transaction_completion(&self, committed: bool) -> ResourceResult<()>;

    async fn close(&self) -> ResourceResult<()>;

    fn is_open(&self) -> bool;
}

/// Something that can mint new resources. Must tolerate concurrent calls.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Resource;

    fn factory_key(&self) -> FactoryKey;

    async fn create_resource(&self) -> ResourceResult<Arc<Self::Resource>>;
}
