//! 测试辅助
//!
//! 提供记录型连接、脚本化读取端等测试替身，单元测试与集成测试共用。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{NewNotification, Notification};
use crate::transport::{ConnectionId, Inbound, MessageReader, Transport, TransportError};

/// 构造一条测试通知
pub fn sample_notification(sender: &str, receiver: &str, message: &str) -> Notification {
    NewNotification::new(sender, receiver, message).into_notification(Utc::now())
}

/// 在限定时间内轮询直到条件成立
pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(within, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// 记录所有写入的测试连接
pub struct RecordingTransport {
    id: ConnectionId,
    written: Mutex<Vec<Notification>>,
    pings: AtomicUsize,
    closes: AtomicUsize,
    writes_started: AtomicUsize,
    closed: CancellationToken,
    fail_writes: bool,
    fail_pings: bool,
    gate: Option<Semaphore>,
}

impl RecordingTransport {
    fn build(fail_writes: bool, fail_pings: bool, gate: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            written: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            writes_started: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            fail_writes,
            fail_pings,
            gate,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false, false, None)
    }

    /// 每次写入都失败
    pub fn failing() -> Arc<Self> {
        Self::build(true, false, None)
    }

    /// 每次 ping 都失败
    pub fn failing_pings() -> Arc<Self> {
        Self::build(false, true, None)
    }

    /// 写入会阻塞，直到 `open_gate` 放行
    pub fn gated() -> Arc<Self> {
        Self::build(false, false, Some(Semaphore::new(0)))
    }

    pub fn open_gate(&self, writes: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(writes);
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn written(&self) -> Vec<Notification> {
        self.written.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.written
            .lock()
            .iter()
            .map(|n| n.message.clone())
            .collect()
    }

    pub fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn wait_closed(&self, within: Duration) -> bool {
        tokio::time::timeout(within, self.closed.cancelled())
            .await
            .is_ok()
    }

    pub async fn wait_for_writes(&self, count: usize, within: Duration) -> bool {
        wait_until(within, || self.written.lock().len() >= count).await
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn done(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn write_json(&self, notification: &Notification) -> Result<(), TransportError> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_writes {
            return Err(TransportError::Io("broken pipe".to_string()));
        }
        self.written.lock().push(notification.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_pings || self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
    }
}

/// 由测试代码推送入站帧的读取端
///
/// 发送端全部释放后返回 `None`，相当于对端断开。
pub struct ScriptedReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl ScriptedReader {
    pub fn channel() -> (mpsc::UnboundedSender<Inbound>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl MessageReader for ScriptedReader {
    async fn read_message(&mut self) -> Option<Result<Inbound, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}
