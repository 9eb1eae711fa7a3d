//! 通知存储层
//!
//! 仓储只负责持久化，投递与校验逻辑留给调用方。
//! PostgreSQL 实现用于生产，内存实现用于单机模式和测试。

mod memory_repo;
mod notification_repo;
mod traits;

pub use memory_repo::MemoryNotificationRepository;
pub use notification_repo::NotificationRepository;
pub use traits::*;

/// 嵌入的数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
