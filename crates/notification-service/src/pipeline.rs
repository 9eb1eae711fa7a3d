//! 投递管道
//!
//! 把消费循环与 Hub 组装在一起，并负责按顺序关闭：
//! 先停消费循环，再停 Hub；每一步最多等待 grace 时长，超时后放弃剩余工作。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::hub::Hub;
use crate::ingest::IngestConsumer;
use crate::queue::{QueueReader, QueueWriter};
use crate::repository::NotificationRepositoryTrait;

pub struct Pipeline {
    hub: Hub,
    shutdown_tx: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

impl Pipeline {
    /// 启动消费循环
    pub fn start<R>(
        reader: R,
        repository: Arc<dyn NotificationRepositoryTrait>,
        hub: Hub,
        dead_letter: Option<Arc<dyn QueueWriter>>,
        fetch_backoff: Duration,
    ) -> Self
    where
        R: QueueReader + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut consumer =
            IngestConsumer::new(reader, repository, hub.clone()).with_fetch_backoff(fetch_backoff);
        if let Some(writer) = dead_letter {
            consumer = consumer.with_dead_letter(writer);
        }
        let consumer = tokio::spawn(consumer.run(shutdown_rx));

        Self {
            hub,
            shutdown_tx,
            consumer,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// 关闭消费循环与 Hub
    pub async fn shutdown(self, grace: Duration) {
        info!(?grace, "开始关闭投递管道");
        let _ = self.shutdown_tx.send(true);

        let mut consumer = self.consumer;
        match tokio::time::timeout(grace, &mut consumer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "消费任务异常退出"),
            Err(_) => {
                warn!("等待消费循环超时，放弃剩余条目");
                consumer.abort();
            }
        }

        if tokio::time::timeout(grace, self.hub.shutdown()).await.is_err() {
            warn!("等待 Hub 关闭超时，放弃剩余连接");
        }

        info!("投递管道已关闭");
    }
}
