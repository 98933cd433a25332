use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use delguur_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, Intent, Sender, Turn,
};
use delguur_core::domain::customer::CustomerId;
use delguur_core::extraction::Extraction;

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(
        &self,
        query: &str,
        bind: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(query).bind(bind).fetch_optional(&self.pool).await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut conversation = row_to_conversation(&row)?;
        conversation.turns = self.load_turns(&conversation.id).await?;
        Ok(Some(conversation))
    }

    async fn load_turns(&self, id: &ConversationId) -> Result<Vec<Turn>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT sender, body, at FROM conversation_turn
             WHERE conversation_id = ? ORDER BY turn_index ASC",
        )
        .bind(id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_turn).collect::<Result<Vec<_>, _>>()
    }
}

fn parse_status(s: &str) -> ConversationStatus {
    match s {
        "waiting_for_info" => ConversationStatus::WaitingForInfo,
        "order_created" => ConversationStatus::OrderCreated,
        _ => ConversationStatus::New,
    }
}

pub fn status_as_str(status: ConversationStatus) -> &'static str {
    match status {
        ConversationStatus::New => "new",
        ConversationStatus::WaitingForInfo => "waiting_for_info",
        ConversationStatus::OrderCreated => "order_created",
    }
}

fn parse_intent(s: &str) -> Intent {
    match s {
        "ordering" => Intent::Ordering,
        "inquiry" => Intent::Inquiry,
        "complaint" => Intent::Complaint,
        "browsing" => Intent::Browsing,
        _ => Intent::Other,
    }
}

pub fn intent_as_str(intent: Intent) -> &'static str {
    match intent {
        Intent::Ordering => "ordering",
        Intent::Inquiry => "inquiry",
        Intent::Complaint => "complaint",
        Intent::Browsing => "browsing",
        Intent::Other => "other",
    }
}

fn sender_as_str(sender: Sender) -> &'static str {
    match sender {
        Sender::Customer => "customer",
        Sender::Bot => "bot",
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, RepositoryError> {
    let sender_str: String =
        row.try_get("sender").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let body: String = row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let at_str: String = row.try_get("at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let sender = match sender_str.as_str() {
        "bot" => Sender::Bot,
        _ => Sender::Customer,
    };

    Ok(Turn { sender, text: body, at: parse_timestamp(&at_str) })
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let thread_id: String =
        row.try_get("thread_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_id: String =
        row.try_get("customer_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let intent_str: String =
        row.try_get("current_intent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_extraction_str: Option<String> =
        row.try_get("last_extraction").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let id = Uuid::parse_str(&id)
        .map_err(|e| RepositoryError::Decode(format!("conversation id `{id}`: {e}")))?;
    let customer_id = Uuid::parse_str(&customer_id)
        .map_err(|e| RepositoryError::Decode(format!("customer id `{customer_id}`: {e}")))?;

    let last_extraction = match last_extraction_str {
        Some(raw) => Some(
            serde_json::from_str::<Extraction>(&raw)
                .map_err(|e| RepositoryError::Decode(format!("last_extraction: {e}")))?,
        ),
        None => None,
    };

    Ok(Conversation {
        id: ConversationId(id),
        thread_id,
        customer_id: CustomerId(customer_id),
        status: parse_status(&status_str),
        current_intent: parse_intent(&intent_str),
        turns: Vec::new(),
        last_extraction,
        version,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        self.load(
            "SELECT id, thread_id, customer_id, status, current_intent, last_extraction,
                    version, created_at, updated_at
             FROM conversation WHERE id = ?",
            &id.0.to_string(),
        )
        .await
    }

    async fn find_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        self.load(
            "SELECT id, thread_id, customer_id, status, current_intent, last_extraction,
                    version, created_at, updated_at
             FROM conversation WHERE thread_id = ?",
            thread_id,
        )
        .await
    }

    async fn save(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let last_extraction = match &conversation.last_extraction {
            Some(extraction) => Some(
                serde_json::to_string(extraction)
                    .map_err(|e| RepositoryError::Decode(format!("last_extraction: {e}")))?,
            ),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let next_version = conversation.version + 1;
        if conversation.version == 0 {
            sqlx::query(
                "INSERT INTO conversation (id, thread_id, customer_id, status, current_intent,
                                           last_extraction, version, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(conversation.id.0.to_string())
            .bind(&conversation.thread_id)
            .bind(conversation.customer_id.0.to_string())
            .bind(status_as_str(conversation.status))
            .bind(intent_as_str(conversation.current_intent))
            .bind(&last_extraction)
            .bind(next_version)
            .bind(conversation.created_at.to_rfc3339())
            .bind(conversation.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        } else {
            let result = sqlx::query(
                "UPDATE conversation SET
                     status = ?, current_intent = ?, last_extraction = ?,
                     version = ?, updated_at = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(status_as_str(conversation.status))
            .bind(intent_as_str(conversation.current_intent))
            .bind(&last_extraction)
            .bind(next_version)
            .bind(conversation.updated_at.to_rfc3339())
            .bind(conversation.id.0.to_string())
            .bind(conversation.version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::VersionConflict {
                    thread_id: conversation.thread_id.clone(),
                    expected: conversation.version,
                });
            }
        }

        // Turn history is small and bounded in practice; rewrite it whole.
        sqlx::query("DELETE FROM conversation_turn WHERE conversation_id = ?")
            .bind(conversation.id.0.to_string())
            .execute(&mut *tx)
            .await?;

        for (index, turn) in conversation.turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_turn (conversation_id, turn_index, sender, body, at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(conversation.id.0.to_string())
            .bind(index as i64)
            .bind(sender_as_str(turn.sender))
            .bind(&turn.text)
            .bind(turn.at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut saved = conversation;
        saved.version = next_version;
        Ok(saved)
    }
}
