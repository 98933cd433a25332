use sqlx::Row;
use uuid::Uuid;

use delguur_core::domain::customer::{Customer, CustomerId};

use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_customer(row: &sqlx::sqlite::SqliteRow) -> Result<Customer, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sender_id: String =
        row.try_get("sender_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let display_name: String =
        row.try_get("display_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let id = Uuid::parse_str(&id)
        .map_err(|e| RepositoryError::Decode(format!("customer id `{id}`: {e}")))?;

    Ok(Customer { id: CustomerId(id), sender_id, display_name })
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_sender_id(
        &self,
        sender_id: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sender_id, display_name FROM customer WHERE sender_id = ?",
        )
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_customer(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row =
            sqlx::query("SELECT id, sender_id, display_name FROM customer WHERE id = ?")
                .bind(id.0.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_customer(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (id, sender_id, display_name)
             VALUES (?, ?, ?)
             ON CONFLICT(sender_id) DO UPDATE SET
                 display_name = excluded.display_name",
        )
        .bind(customer.id.0.to_string())
        .bind(&customer.sender_id)
        .bind(&customer.display_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
