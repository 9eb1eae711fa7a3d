//! 通知服务错误类型定义

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notify_shared::error::NotifyError;
use serde_json::json;

use crate::queue::QueueError;

/// 通知服务对外错误
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("通知不存在: {0}")]
    NotificationNotFound(String),

    /// 写入持久队列失败，通知未被接收
    #[error("通知入队失败: {0}")]
    Ingestion(#[from] QueueError),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ServiceError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            Self::Ingestion(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::Ingestion(_) => "INGESTION_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %e, "存储操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Ingestion(e) => {
                tracing::error!(error = %e, "通知入队失败");
                "通知暂时无法接收，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<NotifyError> for ServiceError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::NotFound { id, .. } => Self::NotificationNotFound(id),
            NotifyError::Database(e) => Self::Storage(e.to_string()),
            other => Self::Internal(format!("{}: {}", other.code(), other)),
        }
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, ServiceError>;
