//! 通知 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::{Result, ServiceError},
    models::{ApiResponse, CreateNotificationRequest, NewNotification, Notification, NotificationQuery},
    state::AppState,
};

/// 发布通知
///
/// POST /notifications
///
/// 写入持久队列即返回 202，投递在后台异步完成
pub async fn create_notification(
    State(state): State<AppState>,
    CurrentUser(sender): CurrentUser,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Notification>>)> {
    let notification = state
        .publisher
        .publish(NewNotification::new(sender, req.receiver, req.message))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_message(notification, "通知已接收")),
    ))
}

/// 查询当前用户的通知
///
/// GET /notifications?unread=true
pub async fn list_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<ApiResponse<Vec<Notification>>>> {
    let notifications = state
        .repository
        .find_by_receiver(user.as_str(), query.unread)
        .await?;

    Ok(Json(ApiResponse::success(notifications)))
}

/// 标记已读
///
/// POST /notifications/{id}/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Uuid>>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Validation(format!("无效的通知 ID: {id}")))?;

    state.repository.mark_as_read(id, user.as_str()).await?;
    info!(notification_id = %id, user = user.as_str(), "通知已标记为已读");

    Ok(Json(ApiResponse::success(id)))
}
