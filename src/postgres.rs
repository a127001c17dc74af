use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::resource::{FactoryKey, FlushMode, Resource, ResourceFactory};
use crate::{ResourceError, ResourceResult};

/// Parameter value of a buffered statement.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl From<bool> for PgValue {
    fn from(value: bool) -> Self {
        PgValue::Bool(value)
    }
}

impl From<i64> for PgValue {
    fn from(value: i64) -> Self {
        PgValue::Int(value)
    }
}

impl From<String> for PgValue {
    fn from(value: String) -> Self {
        PgValue::Text(value)
    }
}

impl From<&str> for PgValue {
    fn from(value: &str) -> Self {
        PgValue::Text(value.to_string())
    }
}

impl From<Uuid> for PgValue {
    fn from(value: Uuid) -> Self {
        PgValue::Uuid(value)
    }
}

impl<T: Into<PgValue>> From<Option<T>> for PgValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PgValue::Null, Into::into)
    }
}

/// A write waiting in a session's change set until the next flush.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStatement {
    sql: String,
    params: Vec<PgValue>,
}

impl PendingStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<PgValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

fn build_query<'q>(sql: &'q str, params: &'q [PgValue]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| match value {
            PgValue::Null => query.bind(None::<String>),
            PgValue::Bool(value) => query.bind(*value),
            PgValue::Int(value) => query.bind(*value),
            PgValue::Text(value) => query.bind(value.as_str()),
            PgValue::Uuid(value) => query.bind(*value),
        })
}

/// Creates [`PgSession`]s from a connection pool.
#[derive(Debug, Clone)]
pub struct PgSessionFactory {
    key: FactoryKey,
    pool: PgPool,
}

impl PgSessionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            key: FactoryKey::new(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResourceFactory for PgSessionFactory {
    type Resource = PgSession;

    fn factory_key(&self) -> FactoryKey {
        self.key
    }

    async fn create_resource(&self) -> ResourceResult<Arc<PgSession>> {
        let tx = self.pool.begin().await?;
        Ok(Arc::new(PgSession::new(self.pool.clone(), tx)))
    }
}

/// Postgres unit-of-work session.
///
/// Writes are buffered as [`PendingStatement`]s and executed inside the
/// session's database transaction on flush. The transaction is committed in
/// the commit phase, where a failing COMMIT fails the surrounding commit, and
/// rolled back at completion otherwise. The next flush after that begins a
/// fresh one, so a pre-bound session can serve several transactions.
pub struct PgSession {
    id: Uuid,
    pool: PgPool,
    tx: tokio::sync::Mutex<Option<Transaction<'static, Postgres>>>,
    pending: Mutex<Vec<PendingStatement>>,
    flush_mode: Mutex<FlushMode>,
    open: AtomicBool,
}

impl PgSession {
    fn new(pool: PgPool, tx: Transaction<'static, Postgres>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
            tx: tokio::sync::Mutex::new(Some(tx)),
            pending: Mutex::new(Vec::new()),
            flush_mode: Mutex::new(FlushMode::Auto),
            open: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn ensure_open(&self) -> ResourceResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ResourceError::Closed)
        }
    }

    /// Add a write to the change set; flushed right away in `Always` mode.
    pub async fn queue(&self, statement: PendingStatement) -> ResourceResult<()> {
        self.ensure_open()?;
        self.pending.lock().push(statement);
        if self.flush_mode() == FlushMode::Always {
            self.flush().await?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn flush_before_query(&self) -> ResourceResult<()> {
        if self.flush_mode() >= FlushMode::Auto && self.pending_count() > 0 {
            self.flush().await?;
        }
        Ok(())
    }

    /// Run a query inside the session's transaction, so it sees flushed but
    /// uncommitted writes.
    pub async fn fetch_optional(&self, sql: &str, params: &[PgValue]) -> ResourceResult<Option<PgRow>> {
        self.ensure_open()?;
        self.flush_before_query().await?;
        let mut tx_guard = self.tx.lock().await;
        if tx_guard.is_none() {
            *tx_guard = Some(self.pool.begin().await?);
        }
        let tx = tx_guard.as_mut().ok_or(ResourceError::Closed)?;
        Ok(build_query(sql, params).fetch_optional(&mut **tx).await?)
    }

    pub async fn fetch_all(&self, sql: &str, params: &[PgValue]) -> ResourceResult<Vec<PgRow>> {
        self.ensure_open()?;
        self.flush_before_query().await?;
        let mut tx_guard = self.tx.lock().await;
        if tx_guard.is_none() {
            *tx_guard = Some(self.pool.begin().await?);
        }
        let tx = tx_guard.as_mut().ok_or(ResourceError::Closed)?;
        Ok(build_query(sql, params).fetch_all(&mut **tx).await?)
    }
}

#[async_trait]
impl Resource for PgSession {
    fn flush_mode(&self) -> FlushMode {
        *self.flush_mode.lock()
    }

    fn set_flush_mode(&self, mode: FlushMode) {
        *self.flush_mode.lock() = mode;
    }

    async fn flush(&self) -> ResourceResult<()> {
        self.ensure_open()?;
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }
        let mut tx_guard = self.tx.lock().await;
        if tx_guard.is_none() {
            *tx_guard = Some(self.pool.begin().await?);
        }
        let tx = tx_guard.as_mut().ok_or(ResourceError::Closed)?;
        for statement in &pending {
            build_query(&statement.sql, &statement.params)
                .execute(&mut **tx)
                .await?;
        }
        tracing::debug!(session = %self.id, statements = pending.len(), "Flushed pending statements");
        Ok(())
    }

    fn clear(&self) {
        self.pending.lock().clear();
    }

    async fn commit(&self) -> ResourceResult<()> {
        self.ensure_open()?;
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.commit().await?;
            tracing::debug!(session = %self.id, "Committed Postgres transaction");
        }
        Ok(())
    }

    async fn after_transaction_completion(&self, committed: bool) -> ResourceResult<()> {
        if !committed {
            self.clear();
        }
        // Anything still open was rolled back or begun after the commit.
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn close(&self) -> ResourceResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.clear();
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            // Work not committed through transaction completion is discarded.
            tx.rollback().await?;
        }
        tracing::debug!(session = %self.id, "Closed Postgres session");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
