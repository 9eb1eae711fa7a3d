//! 通知仓储（PostgreSQL）

use async_trait::async_trait;
use notify_shared::error::{NotifyError, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::NotificationRepositoryTrait;
use crate::models::Notification;

pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepositoryTrait for NotificationRepository {
    async fn save(&self, notification: &Notification) -> Result<()> {
        // 队列至少投递一次，重复消费时按主键忽略
        sqlx::query(
            r#"
            INSERT INTO notifications (id, sender, receiver, message, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(&notification.sender)
        .bind(&notification.receiver)
        .bind(&notification.message)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_receiver(
        &self,
        receiver: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, sender, receiver, message, read, created_at
            FROM notifications
            WHERE receiver = $1
              AND ($2 = FALSE OR read = FALSE)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(receiver)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn mark_as_read(&self, id: Uuid, receiver: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE id = $1 AND receiver = $2
            "#,
        )
        .bind(id)
        .bind(receiver)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NotifyError::NotFound {
                entity: "Notification".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }
}
