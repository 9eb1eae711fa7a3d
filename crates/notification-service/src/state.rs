//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use crate::connection::ConnectionSettings;
use crate::hub::Hub;
use crate::publish::Publisher;
use crate::repository::NotificationRepositoryTrait;

/// Axum 应用共享状态
///
/// 所有组件在 main 中构造后以句柄形式注入，handler 之间共享
#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
    pub repository: Arc<dyn NotificationRepositoryTrait>,
    /// 与消费循环共享同一个 Hub
    pub hub: Hub,
    pub connection: ConnectionSettings,
}

impl AppState {
    pub fn new(
        publisher: Publisher,
        repository: Arc<dyn NotificationRepositoryTrait>,
        hub: Hub,
        connection: ConnectionSettings,
    ) -> Self {
        Self {
            publisher,
            repository,
            hub,
            connection,
        }
    }
}
