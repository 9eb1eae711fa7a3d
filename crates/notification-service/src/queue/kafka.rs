//! Kafka 队列实现
//!
//! 以记录 key 作为分区键，同一接收者的通知落在同一分区。

use async_trait::async_trait;
use notify_shared::config::KafkaConfig;
use notify_shared::error::NotifyError;
use notify_shared::kafka::{KafkaConsumer, KafkaProducer};

use super::{QueueAck, QueueEntry, QueueError, QueueReader, QueueRecord, QueueWriter};

impl From<NotifyError> for QueueError {
    fn from(err: NotifyError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// 写入指定 topic 的 Kafka 写入端
#[derive(Clone)]
pub struct KafkaQueueWriter {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaQueueWriter {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl QueueWriter for KafkaQueueWriter {
    async fn append(&self, record: QueueRecord) -> Result<QueueAck, QueueError> {
        let (partition, offset) = self
            .producer
            .send_with_headers(&self.topic, &record.key, &record.payload, &record.headers)
            .await?;

        Ok(QueueAck {
            partition: Some(partition),
            offset: Some(offset),
        })
    }
}

/// 订阅通知 topic 的 Kafka 读取端
pub struct KafkaQueueReader {
    consumer: KafkaConsumer,
}

impl KafkaQueueReader {
    /// 创建消费者并订阅 `config.topic`
    pub fn subscribe(config: &KafkaConfig) -> Result<Self, NotifyError> {
        let consumer = KafkaConsumer::new(config)?;
        consumer.subscribe(&[config.topic.as_str()])?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl QueueReader for KafkaQueueReader {
    async fn fetch_next(&mut self) -> Result<QueueEntry, QueueError> {
        let msg = self.consumer.recv().await?;
        Ok(QueueEntry {
            key: msg.key,
            payload: msg.payload,
            headers: msg.headers,
            partition: Some(msg.partition),
            offset: Some(msg.offset),
        })
    }
}
