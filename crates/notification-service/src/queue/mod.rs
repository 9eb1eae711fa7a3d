//! 持久队列抽象
//!
//! 发布端通过 `QueueWriter` 追加条目，消费端通过 `QueueReader` 逐条拉取。
//! 同一分区键的条目保持追加顺序。

mod kafka;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use kafka::{KafkaQueueReader, KafkaQueueWriter};
pub use memory::{MemoryQueueReader, MemoryQueueWriter, memory_queue};

/// 队列错误
#[derive(Debug, Error)]
pub enum QueueError {
    /// 队列暂时不可用，可稍后重试
    #[error("队列不可用: {0}")]
    Unavailable(String),

    /// 队列已关闭，不会再有新条目
    #[error("队列已关闭")]
    Closed,
}

/// 待追加的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    /// 分区键，通知使用接收者
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl QueueRecord {
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
            headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// 追加确认，内存队列没有分区与位点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueAck {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// 拉取到的条目
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl From<QueueRecord> for QueueEntry {
    fn from(record: QueueRecord) -> Self {
        Self {
            key: Some(record.key),
            payload: record.payload,
            headers: record.headers,
            partition: None,
            offset: None,
        }
    }
}

/// 队列写入端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueWriter: Send + Sync {
    /// 追加一条记录，返回时记录已被队列确认
    async fn append(&self, record: QueueRecord) -> Result<QueueAck, QueueError>;
}

/// 队列读取端
///
/// `fetch_next` 必须可以被安全取消：在 `tokio::select!` 中落败的调用不能吞掉条目。
#[async_trait]
pub trait QueueReader: Send {
    async fn fetch_next(&mut self) -> Result<QueueEntry, QueueError>;
}
