//! 通知消费端
//!
//! 从持久队列逐条拉取通知：解码 -> 持久化 -> 交给 Hub 推送。
//! 严格串行，一次只处理一条，保持队列顺序；任何一步失败都不重试。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify_shared::observability::{metrics, tracing::set_parent_from_headers};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::hub::Hub;
use crate::models::Notification;
use crate::queue::{QueueEntry, QueueError, QueueReader, QueueRecord, QueueWriter};
use crate::repository::NotificationRepositoryTrait;

/// 写入死信队列时附带的失败原因
pub const DEAD_LETTER_REASON_HEADER: &str = "x-dead-letter-reason";

/// 单条条目的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 已持久化并交给 Hub
    Delivered,
    /// 无法解码或缺少必填字段，跳过
    Malformed,
    /// 持久化失败，不推送
    PersistFailed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Malformed => "malformed",
            Self::PersistFailed => "persist_failed",
        }
    }
}

/// 通知消费者
pub struct IngestConsumer<R> {
    reader: R,
    handler: EntryHandler,
    fetch_backoff: Duration,
}

/// 单条条目的处理逻辑，与读取端分开以便在 await 期间只借用这一部分
struct EntryHandler {
    repository: Arc<dyn NotificationRepositoryTrait>,
    hub: Hub,
    dead_letter: Option<Arc<dyn QueueWriter>>,
}

impl<R> IngestConsumer<R>
where
    R: QueueReader,
{
    pub fn new(reader: R, repository: Arc<dyn NotificationRepositoryTrait>, hub: Hub) -> Self {
        Self {
            reader,
            handler: EntryHandler {
                repository,
                hub,
                dead_letter: None,
            },
            fetch_backoff: Duration::from_secs(1),
        }
    }

    /// 持久化失败的原始条目转发到死信队列
    pub fn with_dead_letter(mut self, writer: Arc<dyn QueueWriter>) -> Self {
        self.handler.dead_letter = Some(writer);
        self
    }

    /// 拉取失败后的等待时间
    pub fn with_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_backoff = backoff;
        self
    }

    /// 运行消费循环，直到收到关闭信号或队列关闭
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("通知消费循环已启动");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetched = tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                fetched = self.reader.fetch_next() => fetched,
            };

            match fetched {
                Ok(entry) => {
                    self.handler.process(entry).await;
                }
                Err(QueueError::Closed) => {
                    warn!("通知队列已关闭，消费循环退出");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "拉取通知失败");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.fetch_backoff) => {}
                    }
                }
            }
        }

        info!("通知消费循环已退出");
    }

    /// 处理一条条目
    pub async fn process(&self, entry: QueueEntry) -> IngestOutcome {
        self.handler.process(entry).await
    }
}

impl EntryHandler {
    async fn process(&self, entry: QueueEntry) -> IngestOutcome {
        let span = info_span!(
            "ingest_notification",
            partition = ?entry.partition,
            offset = ?entry.offset,
        );
        set_parent_from_headers(&span, &entry.headers);

        let start = Instant::now();
        let outcome = self.handle(entry).instrument(span).await;
        metrics::record_notification_ingested(outcome.as_str(), start.elapsed().as_secs_f64());
        outcome
    }

    async fn handle(&self, entry: QueueEntry) -> IngestOutcome {
        let notification = match decode(&entry.payload) {
            Ok(notification) => notification,
            Err(reason) => {
                warn!(
                    key = ?entry.key,
                    reason = %reason,
                    payload_len = entry.payload.len(),
                    "无法解析的通知，已跳过"
                );
                return IngestOutcome::Malformed;
            }
        };

        if let Err(e) = self.repository.save(&notification).await {
            error!(
                notification_id = %notification.id,
                receiver = %notification.receiver,
                error_code = e.code(),
                error = %e,
                "通知持久化失败"
            );
            self.dead_letter(entry, &format!("{}: {}", e.code(), e)).await;
            return IngestOutcome::PersistFailed;
        }

        debug!(
            notification_id = %notification.id,
            receiver = %notification.receiver,
            "通知已持久化"
        );
        let receiver = notification.receiver.clone();
        self.hub.send(&receiver, notification);
        IngestOutcome::Delivered
    }

    async fn dead_letter(&self, entry: QueueEntry, reason: &str) {
        let Some(writer) = &self.dead_letter else {
            return;
        };

        let mut headers: HashMap<String, String> = entry.headers;
        headers.insert(DEAD_LETTER_REASON_HEADER.to_string(), reason.to_string());
        let record = QueueRecord::new(entry.key.unwrap_or_default(), entry.payload)
            .with_headers(headers);

        match writer.append(record).await {
            Ok(_) => info!("通知已转入死信队列"),
            Err(e) => error!(error = %e, "写入死信队列失败，通知丢弃"),
        }
    }
}

fn decode(payload: &[u8]) -> Result<Notification, String> {
    let notification: Notification = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    notification
        .ensure_complete()
        .map_err(|_| "sender、receiver、message 不能为空".to_string())?;
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MockQueueWriter, QueueAck, memory_queue};
    use crate::repository::{MemoryNotificationRepository, MockNotificationRepositoryTrait};
    use crate::test_utils::{RecordingTransport, sample_notification, wait_until};
    use notify_shared::config::DeliveryConfig;
    use notify_shared::error::NotifyError;

    const WAIT: Duration = Duration::from_secs(2);

    fn entry(payload: &[u8]) -> QueueEntry {
        QueueRecord::new("bob", payload.to_vec()).into()
    }

    fn encoded(n: &Notification) -> QueueEntry {
        entry(&serde_json::to_vec(n).unwrap())
    }

    #[tokio::test]
    async fn test_persists_then_delivers() {
        let hub = Hub::spawn(&DeliveryConfig::default());
        let bob = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;
        let repo = Arc::new(MemoryNotificationRepository::new());
        let (_writer, reader) = memory_queue(4);
        let consumer = IngestConsumer::new(reader, repo.clone(), hub.clone());

        let n = sample_notification("alice", "bob", "hi");
        assert_eq!(consumer.process(encoded(&n)).await, IngestOutcome::Delivered);

        // 队列负载里的 createdAt 精度为秒
        let stored = repo.get(n.id).unwrap();
        assert_eq!(stored.message, "hi");
        assert_eq!(stored.created_at.timestamp(), n.created_at.timestamp());
        assert!(bob.wait_for_writes(1, WAIT).await);
        assert_eq!(bob.written()[0].id, n.id);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped() {
        let hub = Hub::spawn(&DeliveryConfig::default());
        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_save().never();
        let (_writer, reader) = memory_queue(4);
        let consumer = IngestConsumer::new(reader, Arc::new(repo), hub);

        assert_eq!(consumer.process(entry(b"{not json")).await, IngestOutcome::Malformed);
        assert_eq!(
            consumer
                .process(entry(br#"{"sender":"alice","receiver":"","message":"hi"}"#))
                .await,
            IngestOutcome::Malformed
        );
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_delivered() {
        let hub = Hub::spawn(&DeliveryConfig::default());
        let bob = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;

        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_save()
            .times(1)
            .returning(|_| Err(NotifyError::Database(sqlx::Error::PoolTimedOut)));
        let (_writer, reader) = memory_queue(4);
        let consumer = IngestConsumer::new(reader, Arc::new(repo), hub.clone());

        let n = sample_notification("alice", "bob", "hi");
        assert_eq!(consumer.process(encoded(&n)).await, IngestOutcome::PersistFailed);

        // Hub 处理完之后的查询一定排在投递之后
        hub.connected_users().await;
        assert!(bob.written().is_empty());
        assert_eq!(hub.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_persist_failure_goes_to_dead_letter() {
        let hub = Hub::spawn(&DeliveryConfig::default());
        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_save()
            .returning(|_| Err(NotifyError::Database(sqlx::Error::PoolTimedOut)));

        let n = sample_notification("alice", "bob", "hi");
        let expected_payload = serde_json::to_vec(&n).unwrap();
        let mut dlq = MockQueueWriter::new();
        dlq.expect_append()
            .withf(move |record| {
                record.key == "bob"
                    && record.payload == expected_payload
                    && record
                        .headers
                        .get(DEAD_LETTER_REASON_HEADER)
                        .is_some_and(|reason| reason.starts_with("DATABASE_ERROR"))
            })
            .times(1)
            .returning(|_| Ok(QueueAck::default()));

        let (_writer, reader) = memory_queue(4);
        let consumer =
            IngestConsumer::new(reader, Arc::new(repo), hub).with_dead_letter(Arc::new(dlq));

        assert_eq!(consumer.process(encoded(&n)).await, IngestOutcome::PersistFailed);
    }

    #[tokio::test]
    async fn test_run_preserves_queue_order_and_survives_bad_entries() {
        let hub = Hub::spawn(&DeliveryConfig::default());
        let bob = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;
        let repo = Arc::new(MemoryNotificationRepository::new());
        let (writer, reader) = memory_queue(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = IngestConsumer::new(reader, repo.clone(), hub.clone());
        let task = tokio::spawn(consumer.run(shutdown_rx));

        let n1 = sample_notification("alice", "bob", "n1");
        let n2 = sample_notification("alice", "bob", "n2");
        for payload in [
            serde_json::to_vec(&n1).unwrap(),
            b"garbage".to_vec(),
            serde_json::to_vec(&n2).unwrap(),
        ] {
            writer.append(QueueRecord::new("bob", payload)).await.unwrap();
        }

        assert!(bob.wait_for_writes(2, WAIT).await);
        assert_eq!(bob.messages(), vec!["n1", "n2"]);
        assert_eq!(repo.len(), 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_exits_when_queue_closes() {
        let hub = Hub::spawn(&DeliveryConfig::default());
        let repo = Arc::new(MemoryNotificationRepository::new());
        let (writer, reader) = memory_queue(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        drop(writer);
        let consumer = IngestConsumer::new(reader, repo, hub);
        tokio::time::timeout(WAIT, consumer.run(shutdown_rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_errors_back_off_and_continue() {
        struct FlakyReader {
            failures: usize,
            inner: crate::queue::MemoryQueueReader,
        }

        #[async_trait::async_trait]
        impl QueueReader for FlakyReader {
            async fn fetch_next(&mut self) -> Result<QueueEntry, QueueError> {
                if self.failures > 0 {
                    self.failures -= 1;
                    return Err(QueueError::Unavailable("broker down".to_string()));
                }
                self.inner.fetch_next().await
            }
        }

        let hub = Hub::spawn(&DeliveryConfig::default());
        let repo = Arc::new(MemoryNotificationRepository::new());
        let (writer, inner) = memory_queue(4);
        let reader = FlakyReader { failures: 2, inner };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = IngestConsumer::new(reader, repo.clone(), hub)
            .with_fetch_backoff(Duration::from_millis(10));
        let task = tokio::spawn(consumer.run(shutdown_rx));

        let n = sample_notification("alice", "bob", "after outage");
        writer
            .append(QueueRecord::new("bob", serde_json::to_vec(&n).unwrap()))
            .await
            .unwrap();

        assert!(wait_until(WAIT, || repo.len() == 1).await);
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }
}
