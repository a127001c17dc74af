use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use unit_of_work_sync::{
    BranchId, CompletionStatus, DataAccessResult, ExternalStatus, ExternalSynchronization,
    ExternalTransactionManager, FactoryKey, FlushMode, Resource, ResourceError, ResourceFactory,
    ResourceResult, TransactionAware, TransactionResult,
};

/// In-memory session that records every lifecycle call.
#[derive(Debug)]
pub struct MockSession {
    pub id: usize,
    flush_mode: Mutex<FlushMode>,
    pending: Mutex<Vec<String>>,
    flushed: Mutex<Vec<String>>,
    completion: Mutex<Option<bool>>,
    flush_count: AtomicUsize,
    commit_count: AtomicUsize,
    clear_count: AtomicUsize,
    close_count: AtomicUsize,
    fail_flush: AtomicBool,
    fail_commit: AtomicBool,
    fail_close: AtomicBool,
    open: AtomicBool,
}

impl MockSession {
    pub fn new(id: usize, flush_mode: FlushMode) -> Self {
        Self {
            id,
            flush_mode: Mutex::new(flush_mode),
            pending: Mutex::new(Vec::new()),
            flushed: Mutex::new(Vec::new()),
            completion: Mutex::new(None),
            flush_count: AtomicUsize::new(0),
            commit_count: AtomicUsize::new(0),
            clear_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            fail_flush: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            open: AtomicBool::new(true),
        }
    }

    pub fn save(&self, change: &str) {
        self.pending.lock().push(change.to_string());
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().clone()
    }

    pub fn flushed(&self) -> Vec<String> {
        self.flushed.lock().clone()
    }

    /// Outcome passed to the last `after_transaction_completion` call.
    pub fn last_completion(&self) -> Option<bool> {
        *self.completion.lock()
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commit_count.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clear_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn fail_flush(&self) {
        self.fail_flush.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Resource for MockSession {
    fn flush_mode(&self) -> FlushMode {
        *self.flush_mode.lock()
    }

    fn set_flush_mode(&self, mode: FlushMode) {
        *self.flush_mode.lock() = mode;
    }

    async fn flush(&self) -> ResourceResult<()> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(ResourceError::Provider("constraint violation".to_string()));
        }
        let pending = std::mem::take(&mut *self.pending.lock());
        self.flushed.lock().extend(pending);
        Ok(())
    }

    fn clear(&self) {
        self.clear_count.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().clear();
    }

    async fn commit(&self) -> ResourceResult<()> {
        self.commit_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(ResourceError::Provider("serialization failure".to_string()));
        }
        Ok(())
    }

    async fn after_transaction_completion(&self, committed: bool) -> ResourceResult<()> {
        *self.completion.lock() = Some(committed);
        Ok(())
    }

    async fn close(&self) -> ResourceResult<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ResourceError::Provider("connection reset".to_string()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Factory handing out numbered [`MockSession`]s.
pub struct MockSessionFactory {
    key: FactoryKey,
    flush_mode: FlushMode,
    next_id: AtomicUsize,
    fail_create: AtomicBool,
    fail_close: AtomicBool,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::with_flush_mode(FlushMode::Auto)
    }

    pub fn with_flush_mode(flush_mode: FlushMode) -> Self {
        Self {
            key: FactoryKey::new(),
            flush_mode,
            next_id: AtomicUsize::new(1),
            fail_create: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Sessions created from now on fail to close.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceFactory for MockSessionFactory {
    type Resource = MockSession;

    fn factory_key(&self) -> FactoryKey {
        self.key
    }

    async fn create_resource(&self) -> ResourceResult<Arc<MockSession>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ResourceError::Provider("database is down".to_string()));
        }
        let session = Arc::new(MockSession::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            self.flush_mode,
        ));
        if self.fail_close.load(Ordering::SeqCst) {
            session.fail_close();
        }
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// External transaction manager driven step by step from tests.
pub struct ScriptedTransactionManager {
    status: Mutex<ExternalStatus>,
    branch: Mutex<Option<BranchId>>,
    synchronizations: Mutex<Vec<(BranchId, Arc<dyn ExternalSynchronization>)>>,
    rollback_only: AtomicBool,
}

impl ScriptedTransactionManager {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(ExternalStatus::NoTransaction),
            branch: Mutex::new(None),
            synchronizations: Mutex::new(Vec::new()),
            rollback_only: AtomicBool::new(false),
        }
    }

    pub fn begin(&self) -> BranchId {
        let branch = BranchId::new();
        *self.branch.lock() = Some(branch);
        *self.status.lock() = ExternalStatus::Active;
        branch
    }

    /// Detach the current transaction from the caller.
    pub fn suspend(&self) -> Option<BranchId> {
        *self.status.lock() = ExternalStatus::NoTransaction;
        self.branch.lock().take()
    }

    pub fn resume(&self, branch: BranchId) {
        *self.branch.lock() = Some(branch);
        *self.status.lock() = ExternalStatus::Active;
    }

    pub fn registered(&self) -> usize {
        self.synchronizations.lock().len()
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Complete the current branch, firing its synchronizations.
    pub async fn complete(&self, status: CompletionStatus) {
        let Some(branch) = *self.branch.lock() else {
            return;
        };
        let synchronizations: Vec<Arc<dyn ExternalSynchronization>> = {
            let mut all = self.synchronizations.lock();
            let (mine, others): (Vec<_>, Vec<_>) = all.drain(..).partition(|(owner, _)| *owner == branch);
            *all = others;
            mine.into_iter().map(|(_, synchronization)| synchronization).collect()
        };
        if status == CompletionStatus::Committed {
            for synchronization in &synchronizations {
                synchronization.before_completion().await;
            }
        }
        let status = if status == CompletionStatus::Committed && self.is_rollback_only() {
            CompletionStatus::RolledBack
        } else {
            status
        };
        for synchronization in &synchronizations {
            synchronization.after_completion(status).await;
        }
        *self.status.lock() = match status {
            CompletionStatus::Committed => ExternalStatus::Committed,
            _ => ExternalStatus::RolledBack,
        };
        *self.branch.lock() = None;
    }
}

impl ExternalTransactionManager for ScriptedTransactionManager {
    fn status(&self) -> DataAccessResult<ExternalStatus> {
        Ok(*self.status.lock())
    }

    fn current_branch(&self) -> DataAccessResult<Option<BranchId>> {
        Ok(*self.branch.lock())
    }

    fn register_synchronization(&self, synchronization: Arc<dyn ExternalSynchronization>) -> DataAccessResult<()> {
        let branch = (*self.branch.lock()).ok_or_else(|| {
            unit_of_work_sync::DataAccessError::ExternalTransaction("no transaction".to_string())
        })?;
        self.synchronizations.lock().push((branch, synchronization));
        Ok(())
    }

    fn set_rollback_only(&self) -> DataAccessResult<()> {
        self.rollback_only.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Observer recording which completion callback it received.
pub struct RecordingObserver {
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for RecordingObserver {
    async fn on_commit(&self) -> TransactionResult<()> {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> TransactionResult<()> {
        *self.rolled_back.write() = true;
        Ok(())
    }
}
