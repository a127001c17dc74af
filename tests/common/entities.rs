use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use unit_of_work_sync::PendingStatement;

/// Sample User entity for testing
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl User {
    pub fn new(username: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
        }
    }

    pub fn insert_statement(&self) -> PendingStatement {
        PendingStatement::new("INSERT INTO users (id, username, email) VALUES ($1, $2, $3)")
            .bind(self.id)
            .bind(self.username.as_str())
            .bind(self.email.as_str())
    }

    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
        }
    }
}

/// Sample Order entity for testing
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_name: String,
    pub amount: i64,
}

impl Order {
    pub fn new(user_id: Uuid, product_name: String, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_name,
            amount,
        }
    }

    pub fn insert_statement(&self) -> PendingStatement {
        PendingStatement::new("INSERT INTO orders (id, user_id, product_name, amount) VALUES ($1, $2, $3, $4)")
            .bind(self.id)
            .bind(self.user_id)
            .bind(self.product_name.as_str())
            .bind(self.amount)
    }

    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            product_name: row.get("product_name"),
            amount: row.get("amount"),
        }
    }
}
