//! 仓储 Trait 定义

use async_trait::async_trait;
use notify_shared::error::Result;
use uuid::Uuid;

use crate::models::Notification;

/// 通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    /// 保存通知；同一 id 重复保存不会产生第二条记录
    async fn save(&self, notification: &Notification) -> Result<()>;

    /// 按创建时间倒序列出接收者的通知
    async fn find_by_receiver(&self, receiver: &str, unread_only: bool)
    -> Result<Vec<Notification>>;

    /// 将接收者的一条通知标记为已读，找不到时返回 `NotFound`
    async fn mark_as_read(&self, id: Uuid, receiver: &str) -> Result<()>;
}
