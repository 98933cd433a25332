use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use delguur_core::domain::conversation::ConversationId;
use delguur_core::domain::customer::CustomerId;
use delguur_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, Provenance};

use super::{OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(&self, query: &str, bind: &str) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(query).bind(bind).fetch_optional(&self.pool).await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut order = row_to_order(&row)?;
        order.lines = self.load_lines(&order.id).await?;
        Ok(Some(order))
    }

    async fn load_lines(&self, id: &OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT product_name, quantity, unit_price FROM order_line
             WHERE order_id = ? ORDER BY line_index ASC",
        )
        .bind(id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_line).collect::<Result<Vec<_>, _>>()
    }
}

fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "fulfilled" => OrderStatus::Fulfilled,
        "cancelled" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

pub fn order_status_as_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Fulfilled => "fulfilled",
        OrderStatus::Cancelled => "cancelled",
    }
}

fn row_to_line(row: &sqlx::sqlite::SqliteRow) -> Result<OrderLine, RepositoryError> {
    let product_name: String =
        row.try_get("product_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quantity: i64 =
        row.try_get("quantity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unit_price_str: String =
        row.try_get("unit_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let quantity = u32::try_from(quantity)
        .map_err(|_| RepositoryError::Decode(format!("line quantity `{quantity}`")))?;
    let unit_price = Decimal::from_str(&unit_price_str)
        .map_err(|e| RepositoryError::Decode(format!("unit price `{unit_price_str}`: {e}")))?;

    Ok(OrderLine { product_name, quantity, unit_price })
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let conversation_id: String =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_id: String =
        row.try_get("customer_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let phone: String = row.try_get("phone").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let address: String =
        row.try_get("address").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let total_str: String =
        row.try_get("total").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let needs_review: i64 =
        row.try_get("needs_review").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let message_text: String =
        row.try_get("message_text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let raw_extraction_str: String =
        row.try_get("raw_extraction").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let confidence: f64 =
        row.try_get("confidence").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let id =
        Uuid::parse_str(&id).map_err(|e| RepositoryError::Decode(format!("order id `{id}`: {e}")))?;
    let conversation_id = Uuid::parse_str(&conversation_id).map_err(|e| {
        RepositoryError::Decode(format!("conversation id `{conversation_id}`: {e}"))
    })?;
    let customer_id = Uuid::parse_str(&customer_id)
        .map_err(|e| RepositoryError::Decode(format!("customer id `{customer_id}`: {e}")))?;
    let total = Decimal::from_str(&total_str)
        .map_err(|e| RepositoryError::Decode(format!("order total `{total_str}`: {e}")))?;
    let raw_extraction = serde_json::from_str(&raw_extraction_str)
        .map_err(|e| RepositoryError::Decode(format!("raw_extraction: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Order {
        id: OrderId(id),
        conversation_id: ConversationId(conversation_id),
        customer_id: CustomerId(customer_id),
        phone,
        address,
        lines: Vec::new(),
        total,
        needs_review: needs_review != 0,
        status: parse_order_status(&status_str),
        provenance: Provenance { message_text, raw_extraction, confidence },
        created_at,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        self.load(
            "SELECT id, conversation_id, customer_id, phone, address, total, needs_review,
                    status, message_text, raw_extraction, confidence, created_at
             FROM orders WHERE id = ?",
            &id.0.to_string(),
        )
        .await
    }

    async fn find_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Order>, RepositoryError> {
        self.load(
            "SELECT id, conversation_id, customer_id, phone, address, total, needs_review,
                    status, message_text, raw_extraction, confidence, created_at
             FROM orders WHERE conversation_id = ?",
            &conversation_id.0.to_string(),
        )
        .await
    }

    async fn insert(&self, order: Order) -> Result<(), RepositoryError> {
        let raw_extraction = serde_json::to_string(&order.provenance.raw_extraction)
            .map_err(|e| RepositoryError::Decode(format!("raw_extraction: {e}")))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, conversation_id, customer_id, phone, address, total,
                                 needs_review, status, message_text, raw_extraction,
                                 confidence, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.id.0.to_string())
        .bind(order.conversation_id.0.to_string())
        .bind(order.customer_id.0.to_string())
        .bind(&order.phone)
        .bind(&order.address)
        .bind(order.total.to_string())
        .bind(i64::from(order.needs_review))
        .bind(order_status_as_str(order.status))
        .bind(&order.provenance.message_text)
        .bind(&raw_extraction)
        .bind(order.provenance.confidence)
        .bind(order.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (index, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_line (order_id, line_index, product_name, quantity, unit_price)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(order.id.0.to_string())
            .bind(index as i64)
            .bind(&line.product_name)
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
