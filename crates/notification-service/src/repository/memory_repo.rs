//! 内存通知仓储
//!
//! 单机模式与测试使用，进程退出后数据丢失。

use std::collections::HashMap;

use async_trait::async_trait;
use notify_shared::error::{NotifyError, Result};
use parking_lot::RwLock;
use uuid::Uuid;

use super::traits::NotificationRepositoryTrait;
use crate::models::Notification;

#[derive(Default)]
pub struct MemoryNotificationRepository {
    notifications: RwLock<HashMap<Uuid, Notification>>,
}

impl MemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notifications.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.read().is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<Notification> {
        self.notifications.read().get(&id).cloned()
    }
}

#[async_trait]
impl NotificationRepositoryTrait for MemoryNotificationRepository {
    async fn save(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .write()
            .entry(notification.id)
            .or_insert_with(|| notification.clone());
        Ok(())
    }

    async fn find_by_receiver(
        &self,
        receiver: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut found: Vec<Notification> = self
            .notifications
            .read()
            .values()
            .filter(|n| n.receiver == receiver && !(unread_only && n.read))
            .cloned()
            .collect();

        // 与 SQL 实现一致：创建时间倒序，同一时间按 id 倒序（v7 id 随时间递增）
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn mark_as_read(&self, id: Uuid, receiver: &str) -> Result<()> {
        match self.notifications.write().get_mut(&id) {
            Some(n) if n.receiver == receiver => {
                n.read = true;
                Ok(())
            }
            _ => Err(NotifyError::NotFound {
                entity: "Notification".to_string(),
                id: id.to_string(),
            }),
        }
    }
}
