use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use unit_of_work_sync::{
    get_resource, PgSession, PgSessionFactory, PgValue, TransactionAware,
    TransactionContext, TransactionResult,
};

use super::entities::{Order, User};

/// Transaction-aware User Repository
pub struct UserRepository {
    factory: Arc<PgSessionFactory>,
    context: TransactionContext,
    // Track operations for verification in tests
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl UserRepository {
    pub fn new(factory: Arc<PgSessionFactory>, context: TransactionContext) -> Arc<Self> {
        Arc::new(Self {
            factory,
            context,
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    /// The session of the current transaction.
    pub async fn session(&self) -> TransactionResult<Arc<PgSession>> {
        Ok(get_resource(&self.context, self.factory.as_ref(), true).await?)
    }

    pub async fn create(&self, user: &User) -> TransactionResult<()> {
        let session = self.session().await?;
        session.queue(user.insert_statement()).await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> TransactionResult<Option<User>> {
        let session = self.session().await?;
        let row = session
            .fetch_optional(
                "SELECT id, username, email FROM users WHERE id = $1",
                &[PgValue::Uuid(id)],
            )
            .await?;

        Ok(row.as_ref().map(User::from_row))
    }

    pub async fn count(&self) -> TransactionResult<i64> {
        let session = self.session().await?;
        let row = session
            .fetch_optional("SELECT COUNT(*) as count FROM users", &[])
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("count")).unwrap_or(0))
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for UserRepository {
    async fn on_commit(&self) -> TransactionResult<()> {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> TransactionResult<()> {
        *self.rolled_back.write() = true;
        Ok(())
    }
}

/// Transaction-aware Order Repository
pub struct OrderRepository {
    factory: Arc<PgSessionFactory>,
    context: TransactionContext,
    // Track operations for verification in tests
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl OrderRepository {
    pub fn new(factory: Arc<PgSessionFactory>, context: TransactionContext) -> Arc<Self> {
        Arc::new(Self {
            factory,
            context,
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn session(&self) -> TransactionResult<Arc<PgSession>> {
        Ok(get_resource(&self.context, self.factory.as_ref(), true).await?)
    }

    pub async fn create(&self, order: &Order) -> TransactionResult<()> {
        let session = self.session().await?;
        session.queue(order.insert_statement()).await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> TransactionResult<Option<Order>> {
        let session = self.session().await?;
        let row = session
            .fetch_optional(
                "SELECT id, user_id, product_name, amount FROM orders WHERE id = $1",
                &[PgValue::Uuid(id)],
            )
            .await?;

        Ok(row.as_ref().map(Order::from_row))
    }

    pub async fn count(&self) -> TransactionResult<i64> {
        let session = self.session().await?;
        let row = session
            .fetch_optional("SELECT COUNT(*) as count FROM orders", &[])
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("count")).unwrap_or(0))
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for OrderRepository {
    async fn on_commit(&self) -> TransactionResult<()> {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> TransactionResult<()> {
        *self.rolled_back.write() = true;
        Ok(())
    }
}
