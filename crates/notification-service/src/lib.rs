//! 实时通知投递服务
//!
//! 发布请求写入持久队列后立即返回；后台消费循环逐条解码、持久化，
//! 再交给 Hub 推送到接收者当前的 WebSocket 连接。
//!
//! ## 模块
//!
//! - `publish`：发布流程，补齐服务端字段并按接收者入队
//! - `ingest`：消费循环，取出 -> 解码 -> 持久化 -> 投递
//! - `hub`：用户到连接的注册表与尽力投递
//! - `connection`：单条连接的读取与保活
//! - `pipeline`：组装与有序关闭

pub mod auth;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod queue;
pub mod repository;
pub mod routes;
pub mod state;
pub mod test_utils;
pub mod transport;

pub use error::{Result, ServiceError};
pub use hub::Hub;
pub use models::Notification;
pub use pipeline::Pipeline;
pub use publish::Publisher;
