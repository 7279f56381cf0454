//! PostgreSQL implementation of [`NotificationStore`].

use async_trait::async_trait;
use herald_core::{
    Notification, NotificationError, NotificationStats, NotificationStatus, NotificationStore,
    RetryPolicy, Transition,
};
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::PostgresConfig;
use crate::error::{Result, storage_error};
use crate::{migrations, pool};

const COLUMNS: &str = "id, recipient, channels, content, status, send_for, sent_at, \
                       retry_count, last_error, created_at";

type NotificationRow = (
    Uuid,
    i64,
    Vec<String>,
    String,
    String,
    OffsetDateTime,
    Option<OffsetDateTime>,
    i32,
    String,
    OffsetDateTime,
);

fn from_row(row: NotificationRow) -> std::result::Result<Notification, NotificationError> {
    let (
        id,
        recipient,
        channels,
        content,
        status,
        send_for,
        sent_at,
        retry_count,
        last_error,
        created_at,
    ) = row;

    Ok(Notification {
        id,
        recipient,
        channels,
        content,
        status: status.parse()?,
        send_for,
        sent_at,
        retry_count: u32::try_from(retry_count).unwrap_or_default(),
        last_error,
        created_at,
    })
}

#[derive(Clone)]
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect (retrying under `reconnect`) and apply migrations if enabled.
    pub async fn connect(config: &PostgresConfig, reconnect: &RetryPolicy) -> Result<Self> {
        let pool = pool::create_pool(config, reconnect).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        }
        info!("PostgreSQL notification store ready");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    #[instrument(skip(self, notification), fields(notification_id = %notification.id))]
    async fn insert(&self, notification: &Notification) -> std::result::Result<(), NotificationError> {
        sqlx_core::query::query(
            r#"
            INSERT INTO notifications
                (id, recipient, channels, content, status, send_for, sent_at,
                 retry_count, last_error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(notification.id)
        .bind(notification.recipient)
        .bind(&notification.channels)
        .bind(&notification.content)
        .bind(notification.status.as_str())
        .bind(notification.send_for)
        .bind(notification.sent_at)
        .bind(i32::try_from(notification.retry_count).unwrap_or(i32::MAX))
        .bind(&notification.last_error)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        debug!("Inserted notification");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> std::result::Result<Option<Notification>, NotificationError> {
        let row: Option<NotificationRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn fetch_due(
        &self,
        until: OffsetDateTime,
        limit: i64,
    ) -> std::result::Result<Vec<Notification>, NotificationError> {
        let rows: Vec<NotificationRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE status = $1 AND send_for <= $2 \
             ORDER BY send_for \
             LIMIT $3"
        ))
        .bind(NotificationStatus::Scheduled.as_str())
        .bind(until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(from_row).collect()
    }

    #[instrument(skip(self, transition), fields(transition = transition.name()))]
    async fn apply(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> std::result::Result<bool, NotificationError> {
        let attempts = transition
            .attempts()
            .map(|a| i32::try_from(a).unwrap_or(i32::MAX));

        let result = sqlx_core::query::query(
            r#"
            UPDATE notifications
            SET status = $3,
                sent_at = COALESCE($4, sent_at),
                retry_count = COALESCE($5, retry_count),
                last_error = COALESCE($6, last_error)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(transition.from().as_str())
        .bind(transition.to().as_str())
        .bind(transition.sent_at())
        .bind(attempts)
        .bind(transition.last_error())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_scheduled(&self, id: Uuid) -> std::result::Result<bool, NotificationError> {
        let result = sqlx_core::query::query(
            "DELETE FROM notifications WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(NotificationStatus::Scheduled.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn created_since(
        &self,
        since: OffsetDateTime,
        limit: i64,
    ) -> std::result::Result<Vec<Notification>, NotificationError> {
        let rows: Vec<NotificationRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE created_at >= $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(from_row).collect()
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> std::result::Result<NotificationStats, NotificationError> {
        let rows: Vec<(String, i64)> = sqlx_core::query_as::query_as(
            "SELECT status, COUNT(*) FROM notifications GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut stats = NotificationStats::default();
        for (status, count) in rows {
            stats.record(status.parse()?, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_from_row() {
        let id = Uuid::new_v4();
        let row: NotificationRow = (
            id,
            42,
            vec!["email".into()],
            "hi".into(),
            "publishing".into(),
            datetime!(2030-01-01 0:00 UTC),
            None,
            0,
            String::new(),
            datetime!(2029-12-31 0:00 UTC),
        );
        let n = from_row(row).unwrap();
        assert_eq!(n.id, id);
        assert_eq!(n.status, NotificationStatus::Publishing);
    }

    #[test]
    fn test_from_row_rejects_unknown_status() {
        let row: NotificationRow = (
            Uuid::new_v4(),
            1,
            vec![],
            String::new(),
            "pending".into(),
            datetime!(2030-01-01 0:00 UTC),
            None,
            0,
            String::new(),
            datetime!(2029-12-31 0:00 UTC),
        );
        assert!(from_row(row).is_err());
    }
}
