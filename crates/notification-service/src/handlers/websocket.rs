//! WebSocket 处理器

use axum::{
    Json,
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};
use tracing::debug;

use crate::{
    auth::CurrentUser,
    connection::handle_socket,
    hub::HubStatsSnapshot,
    models::{ApiResponse, ConnectionStatus},
    state::AppState,
};

/// 升级为 WebSocket 并进入连接生命周期
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(user = %user, "WebSocket 升级请求");
    let hub = state.hub.clone();
    let settings = state.connection;
    ws.on_upgrade(move |socket| handle_socket(socket, user, hub, settings))
}

/// 当前用户在线状态
///
/// GET /ws/status
pub async fn ws_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<ApiResponse<ConnectionStatus>> {
    let connected = state.hub.connection_of(&user).await.is_some();
    let connected_users = state.hub.connected_users().await;

    Json(ApiResponse::success(ConnectionStatus {
        user,
        connected,
        connected_users,
    }))
}

/// Hub 累计投递计数
///
/// GET /ws/stats
pub async fn ws_stats(State(state): State<AppState>) -> Json<ApiResponse<HubStatsSnapshot>> {
    Json(ApiResponse::success(state.hub.stats()))
}
