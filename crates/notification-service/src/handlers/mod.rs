//! HTTP 处理器
//!
//! - `notifications`：发布、查询与已读标记
//! - `websocket`：实时推送连接与在线状态

pub mod notifications;
pub mod websocket;
