//! 内存队列
//!
//! 单机模式与测试使用，单一 FIFO，天然满足同键有序。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{QueueAck, QueueEntry, QueueError, QueueReader, QueueRecord, QueueWriter};

/// 创建一对相连的内存队列读写端
///
/// 队列满时 `append` 会等待消费端腾出空间。
pub fn memory_queue(capacity: usize) -> (MemoryQueueWriter, MemoryQueueReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MemoryQueueWriter { tx }, MemoryQueueReader { rx })
}

#[derive(Clone)]
pub struct MemoryQueueWriter {
    tx: mpsc::Sender<QueueEntry>,
}

#[async_trait]
impl QueueWriter for MemoryQueueWriter {
    async fn append(&self, record: QueueRecord) -> Result<QueueAck, QueueError> {
        self.tx
            .send(record.into())
            .await
            .map_err(|_| QueueError::Closed)?;
        Ok(QueueAck::default())
    }
}

pub struct MemoryQueueReader {
    rx: mpsc::Receiver<QueueEntry>,
}

#[async_trait]
impl QueueReader for MemoryQueueReader {
    async fn fetch_next(&mut self) -> Result<QueueEntry, QueueError> {
        self.rx.recv().await.ok_or(QueueError::Closed)
    }
}
