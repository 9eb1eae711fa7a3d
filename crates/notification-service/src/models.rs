//! 通知数据模型
//!
//! `Notification` 同时是队列负载、存储行和实时推送内容，三处使用同一种 JSON 形态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn new_notification_id() -> Uuid {
    Uuid::now_v7()
}

/// 一条通知
///
/// 离开发布流程后只有 `read` 会变化，且只会从 false 变为 true。
/// `createdAt` 以 Unix 秒序列化，与现有 Web 客户端保持一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// 缺省时由消费端补齐，兼容不带 id 的外部生产者。
    /// 补齐的 id 每次解码都不同，重复投递的无 id 条目会各自落库；
    /// 只有经发布流程写入的条目能按 id 去重。
    #[serde(default = "new_notification_id")]
    pub id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default = "Utc::now", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// 入库前检查必填字段
    pub fn ensure_complete(&self) -> Result<(), ValidationError> {
        not_blank(&self.sender)?;
        not_blank(&self.receiver)?;
        not_blank(&self.message)
    }
}

/// 发布请求
///
/// API 层负责填充 `sender`，调用方只提交接收者与内容。
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewNotification {
    #[validate(custom(function = "not_blank", message = "sender 不能为空"))]
    pub sender: String,
    #[validate(custom(function = "not_blank", message = "receiver 不能为空"))]
    pub receiver: String,
    #[validate(custom(function = "not_blank", message = "message 不能为空"))]
    pub message: String,
}

impl NewNotification {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            message: message.into(),
        }
    }

    /// 补齐服务端字段，生成待写入队列的通知
    pub fn into_notification(self, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id: new_notification_id(),
            sender: self.sender,
            receiver: self.receiver,
            message: self.message,
            read: false,
            created_at,
        }
    }
}

/// `POST /notifications` 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationRequest {
    pub receiver: String,
    pub message: String,
}

/// `GET /notifications` 查询参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationQuery {
    /// true 时只返回未读通知
    #[serde(default)]
    pub unread: bool,
}

/// 在线状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub user: String,
    pub connected: bool,
    pub connected_users: usize,
}

/// 统一 API 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}
