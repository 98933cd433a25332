use chrono::Utc;

use super::{ProcessedEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProcessedEventRepository {
    pool: DbPool,
}

impl SqlProcessedEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProcessedEventRepository for SqlProcessedEventRepository {
    async fn is_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let seen = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM processed_event WHERE event_id = ?)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(seen == 1)
    }

    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO processed_event (event_id, processed_at) VALUES (?, ?)
             ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlProcessedEventRepository;
    use crate::repositories::ProcessedEventRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn first_mark_wins_and_redelivery_is_detected() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlProcessedEventRepository::new(pool);

        assert!(!repo.is_processed("mid.100").await.expect("unseen event"));
        assert!(repo.mark_processed("mid.100").await.expect("first mark"));
        assert!(repo.is_processed("mid.100").await.expect("seen event"));
        assert!(!repo.mark_processed("mid.100").await.expect("second mark"));
        assert!(repo.mark_processed("mid.101").await.expect("other event"));
    }
}
