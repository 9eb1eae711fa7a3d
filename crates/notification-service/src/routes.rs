//! 路由配置模块
//!
//! 定义通知 REST API 与 WebSocket 端点的路由映射

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState};

/// 通知相关路由
fn notification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/notifications",
            post(handlers::notifications::create_notification)
                .get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::notifications::mark_notification_read),
        )
}

/// 实时推送相关路由
fn websocket_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(handlers::websocket::ws_handler))
        .route("/ws/status", get(handlers::websocket::ws_status))
        .route("/ws/stats", get(handlers::websocket::ws_stats))
}

/// 构建完整的 API 路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(notification_routes())
        .merge(websocket_routes())
}
