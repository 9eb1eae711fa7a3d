//! 发布流程
//!
//! 校验请求、补齐服务端字段后写入持久队列，以接收者作为分区键。
//! 队列确认即视为接收成功；失败直接返回给调用方，不做重试。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use notify_shared::observability::{metrics, tracing::inject_to_headers};
use tracing::{error, info, instrument};
use validator::Validate;

use crate::error::{Result, ServiceError};
use crate::models::{NewNotification, Notification};
use crate::queue::{QueueRecord, QueueWriter};

#[derive(Clone)]
pub struct Publisher {
    writer: Arc<dyn QueueWriter>,
}

impl Publisher {
    pub fn new(writer: Arc<dyn QueueWriter>) -> Self {
        Self { writer }
    }

    /// 发布一条通知，返回已入队的通知
    #[instrument(skip_all, fields(sender = %request.sender, receiver = %request.receiver))]
    pub async fn publish(&self, request: NewNotification) -> Result<Notification> {
        request.validate()?;

        let notification = request.into_notification(Utc::now());
        let payload =
            serde_json::to_vec(&notification).map_err(|e| ServiceError::Internal(e.to_string()))?;

        let mut headers = HashMap::new();
        inject_to_headers(&mut headers);
        let record = QueueRecord::new(notification.receiver.as_str(), payload).with_headers(headers);

        match self.writer.append(record).await {
            Ok(ack) => {
                metrics::record_notification_published("success");
                info!(
                    notification_id = %notification.id,
                    partition = ?ack.partition,
                    offset = ?ack.offset,
                    "通知已入队"
                );
                Ok(notification)
            }
            Err(e) => {
                metrics::record_notification_published("failed");
                error!(notification_id = %notification.id, error = %e, "通知入队失败");
                Err(ServiceError::Ingestion(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MockQueueWriter, QueueAck, QueueError};

    #[tokio::test]
    async fn test_publish_stamps_and_keys_by_receiver() {
        let mut writer = MockQueueWriter::new();
        writer
            .expect_append()
            .withf(|record| {
                let n: Notification = serde_json::from_slice(&record.payload).unwrap();
                record.key == "bob"
                    && n.receiver == "bob"
                    && n.sender == "alice"
                    && n.message == "hi"
                    && !n.read
            })
            .times(1)
            .returning(|_| {
                Ok(QueueAck {
                    partition: Some(0),
                    offset: Some(7),
                })
            });

        let before = Utc::now();
        let publisher = Publisher::new(Arc::new(writer));
        let n = publisher
            .publish(NewNotification::new("alice", "bob", "hi"))
            .await
            .unwrap();

        assert!(!n.read);
        assert!(n.created_at >= before);
        assert!(!n.id.is_nil());
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_appended() {
        let mut writer = MockQueueWriter::new();
        writer.expect_append().never();

        let publisher = Publisher::new(Arc::new(writer));
        let err = publisher
            .publish(NewNotification::new("alice", "", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_append_failure_surfaces_as_ingestion_error() {
        let mut writer = MockQueueWriter::new();
        writer
            .expect_append()
            .returning(|_| Err(QueueError::Unavailable("broker down".to_string())));

        let publisher = Publisher::new(Arc::new(writer));
        let err = publisher
            .publish(NewNotification::new("alice", "bob", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Ingestion(QueueError::Unavailable(_))));
    }
}
