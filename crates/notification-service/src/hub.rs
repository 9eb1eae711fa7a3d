//! 投递中心（Hub）
//!
//! 维护 用户 -> 在线连接 的映射，并把通知尽力推送给在线用户。
//!
//! ## 并发模型
//!
//! - 映射只归后台 actor 任务所有，外部通过有界 channel 提交注册、注销、投递与查询请求
//! - 每个 channel 内部 FIFO；actor 每轮按 取消 > 注册 > 注销 > 投递 > 查询 的优先级取请求
//! - `send` 永不阻塞调用方，积压满时直接丢弃并计数
//! - 每个用户最多一个连接，新注册会先关闭旧连接
//! - 关闭后所有操作都变成空操作，仍在排队的连接会被关闭
//! - 推送在 actor 内串行写入，慢连接会阻塞其他请求；单次写入受 `hub_write_timeout` 限制，
//!   超时按写入失败处理并移除该连接

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use notify_shared::config::DeliveryConfig;
use notify_shared::observability::metrics;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::Notification;
use crate::transport::{ConnectionId, Transport, TransportError};

struct Registration {
    user: String,
    connection: Arc<dyn Transport>,
}

enum Unregistration {
    /// 无条件移除用户当前连接
    User(String),
    /// 仅当用户当前连接仍是该连接时移除
    Connection { user: String, id: ConnectionId },
}

struct Delivery {
    user: String,
    notification: Notification,
}

enum Query {
    ConnectionOf {
        user: String,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    ConnectedUsers {
        reply: oneshot::Sender<usize>,
    },
}

/// Hub 累计计数
#[derive(Debug, Default)]
struct HubStats {
    delivered: AtomicU64,
    offline: AtomicU64,
    dropped: AtomicU64,
    write_failures: AtomicU64,
    evictions: AtomicU64,
}

/// Hub 计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatsSnapshot {
    /// 成功写入连接的通知数
    pub delivered: u64,
    /// 接收者不在线而丢弃的通知数
    pub offline: u64,
    /// 积压已满而丢弃的投递请求数
    pub dropped: u64,
    pub write_failures: u64,
    /// 被同一用户新连接顶替的连接数
    pub evictions: u64,
}

/// Hub 句柄
///
/// 可廉价克隆，所有克隆共享同一个后台 actor。
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Unregistration>,
    send_tx: mpsc::Sender<Delivery>,
    query_tx: mpsc::Sender<Query>,
    cancel: CancellationToken,
    stopped: CancellationToken,
    stats: Arc<HubStats>,
}

impl Hub {
    /// 启动 Hub actor，需要在 tokio 运行时内调用
    pub fn spawn(config: &DeliveryConfig) -> Self {
        let (register_tx, register_rx) = mpsc::channel(config.register_buffer.max(1));
        let (unregister_tx, unregister_rx) = mpsc::channel(config.unregister_buffer.max(1));
        let (send_tx, send_rx) = mpsc::channel(config.send_buffer.max(1));
        let (query_tx, query_rx) = mpsc::channel(config.query_buffer.max(1));

        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let stats = Arc::new(HubStats::default());

        let worker = HubWorker {
            connections: HashMap::new(),
            register_rx,
            unregister_rx,
            send_rx,
            query_rx,
            write_timeout: config.hub_write_timeout(),
            cancel: cancel.clone(),
            stats: stats.clone(),
        };
        tokio::spawn(worker.run(stopped.clone()));

        info!(
            register_buffer = config.register_buffer,
            unregister_buffer = config.unregister_buffer,
            send_buffer = config.send_buffer,
            "Hub 已启动"
        );

        Self {
            register_tx,
            unregister_tx,
            send_tx,
            query_tx,
            cancel,
            stopped,
            stats,
        }
    }

    /// 注册用户连接，已有连接会被关闭并替换
    ///
    /// Hub 已关闭时直接关闭传入的连接。
    pub async fn register(&self, user: impl Into<String>, connection: Arc<dyn Transport>) {
        let user = user.into();
        if self.cancel.is_cancelled() {
            debug!(user = %user, "Hub 已关闭，拒绝注册");
            connection.close().await;
            return;
        }

        let request = Registration {
            user,
            connection: connection.clone(),
        };
        let accepted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = self.register_tx.send(request) => result.is_ok(),
        };

        if !accepted {
            connection.close().await;
        }
    }

    /// 移除并关闭用户当前连接，用户不在线时无操作
    pub async fn unregister(&self, user: impl Into<String>) {
        self.submit_unregister(Unregistration::User(user.into()))
            .await;
    }

    /// 连接退出时调用：仅当用户当前连接仍是 `id` 时才移除
    ///
    /// 被新连接顶替的旧连接退出时不会误删新连接。
    pub async fn release(&self, user: impl Into<String>, id: ConnectionId) {
        self.submit_unregister(Unregistration::Connection {
            user: user.into(),
            id,
        })
        .await;
    }

    async fn submit_unregister(&self, request: Unregistration) {
        if self.cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.unregister_tx.send(request) => {}
        }
    }

    /// 提交一次投递，不等待写入结果
    ///
    /// 积压满时丢弃本次请求并计数；用户不在线时由 actor 静默丢弃。
    pub fn send(&self, user: &str, notification: Notification) {
        if self.cancel.is_cancelled() {
            debug!(user, "Hub 已关闭，忽略投递");
            return;
        }

        let delivery = Delivery {
            user: user.to_string(),
            notification,
        };
        match self.send_tx.try_send(delivery) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(delivery)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_hub_dropped_send();
                warn!(
                    user = %delivery.user,
                    notification_id = %delivery.notification.id,
                    "投递积压已满，丢弃通知"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(user, "Hub 已停止，忽略投递");
            }
        }
    }

    /// 查询用户当前连接
    pub async fn connection_of(&self, user: &str) -> Option<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        let query = Query::ConnectionOf {
            user: user.to_string(),
            reply,
        };
        if !self.submit_query(query).await {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// 在线用户数，Hub 停止后返回 0
    pub async fn connected_users(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if !self.submit_query(Query::ConnectedUsers { reply }).await {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn submit_query(&self, query: Query) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = self.query_tx.send(query) => result.is_ok(),
        }
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            offline: self.stats.offline.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            write_failures: self.stats.write_failures.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// 停止 Hub 并等待所有连接关闭，可重复调用
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.stopped.cancelled().await;
    }
}

// ---------------------------------------------------------------------------
// actor
// ---------------------------------------------------------------------------

struct HubWorker {
    connections: HashMap<String, Arc<dyn Transport>>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Unregistration>,
    send_rx: mpsc::Receiver<Delivery>,
    query_rx: mpsc::Receiver<Query>,
    write_timeout: Duration,
    cancel: CancellationToken,
    stats: Arc<HubStats>,
}

impl HubWorker {
    async fn run(mut self, stopped: CancellationToken) {
        // panic 时也要让等待 shutdown 的调用方返回
        let _stopped = stopped.drop_guard();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                Some(request) = self.register_rx.recv() => self.handle_register(request).await,
                Some(request) = self.unregister_rx.recv() => self.handle_unregister(request).await,
                Some(delivery) = self.send_rx.recv() => self.handle_send(delivery).await,
                Some(query) = self.query_rx.recv() => self.handle_query(query),
                // 所有句柄都已释放
                else => break,
            }
        }

        self.drain().await;
    }

    async fn handle_register(&mut self, request: Registration) {
        let Registration { user, connection } = request;

        if let Some(previous) = self.connections.remove(&user)
            && previous.id() != connection.id()
        {
            info!(
                user = %user,
                old_connection = %previous.id(),
                new_connection = %connection.id(),
                "用户重复连接，关闭旧连接"
            );
            previous.close().await;
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::record_ws_connection("evicted");
        }

        debug!(user = %user, connection_id = %connection.id(), "连接已注册");
        self.connections.insert(user, connection);
        metrics::set_hub_active_connections(self.connections.len());
    }

    async fn handle_unregister(&mut self, request: Unregistration) {
        let (user, removed) = match request {
            Unregistration::User(user) => {
                let removed = self.connections.remove(&user);
                (user, removed)
            }
            Unregistration::Connection { user, id } => {
                let is_current = self.connections.get(&user).is_some_and(|c| c.id() == id);
                let removed = if is_current {
                    self.connections.remove(&user)
                } else {
                    None
                };
                (user, removed)
            }
        };

        if let Some(connection) = removed {
            connection.close().await;
            debug!(user = %user, connection_id = %connection.id(), "连接已注销");
            metrics::set_hub_active_connections(self.connections.len());
        }
    }

    async fn handle_send(&mut self, delivery: Delivery) {
        let Delivery { user, notification } = delivery;

        let Some(connection) = self.connections.get(&user).cloned() else {
            self.stats.offline.fetch_add(1, Ordering::Relaxed);
            metrics::record_hub_delivery("offline");
            debug!(user = %user, notification_id = %notification.id, "用户不在线，跳过实时推送");
            return;
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = tokio::time::timeout(self.write_timeout, connection.write_json(&notification)) => {
                result.unwrap_or(Err(TransportError::WriteTimeout(self.write_timeout)))
            }
        };

        match result {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                metrics::record_hub_delivery("written");
                debug!(user = %user, notification_id = %notification.id, "通知已推送");
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_hub_delivery("write_failed");
                warn!(
                    user = %user,
                    connection_id = %connection.id(),
                    error = %e,
                    "推送失败，移除连接"
                );
                self.handle_unregister(Unregistration::Connection {
                    user,
                    id: connection.id(),
                })
                .await;
            }
        }
    }

    fn handle_query(&self, query: Query) {
        match query {
            Query::ConnectionOf { user, reply } => {
                let _ = reply.send(self.connections.get(&user).map(|c| c.id()));
            }
            Query::ConnectedUsers { reply } => {
                let _ = reply.send(self.connections.len());
            }
        }
    }

    /// 停止接收请求并关闭所有连接，包括仍在注册队列中的连接
    async fn drain(&mut self) {
        self.register_rx.close();
        self.unregister_rx.close();
        self.send_rx.close();
        self.query_rx.close();

        let mut closed = 0usize;
        while let Ok(pending) = self.register_rx.try_recv() {
            pending.connection.close().await;
            closed += 1;
        }

        for (user, connection) in self.connections.drain() {
            debug!(user = %user, connection_id = %connection.id(), "关闭连接");
            connection.close().await;
            closed += 1;
        }

        metrics::set_hub_active_connections(0);
        info!(closed, "Hub 已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingTransport, sample_notification, wait_until};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn hub() -> Hub {
        Hub::spawn(&DeliveryConfig::default())
    }

    #[tokio::test]
    async fn test_register_replaces_and_closes_previous_connection() {
        let hub = hub();
        let first = RecordingTransport::new();
        let second = RecordingTransport::new();

        hub.register("bob", first.clone()).await;
        hub.register("bob", second.clone()).await;

        assert_eq!(hub.connection_of("bob").await, Some(second.id()));
        assert!(first.wait_closed(WAIT).await);
        assert!(!second.is_closed());
        assert_eq!(hub.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_send_delivers_to_registered_user() {
        let hub = hub();
        let bob = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;

        hub.send("bob", sample_notification("alice", "bob", "hi"));

        assert!(bob.wait_for_writes(1, WAIT).await);
        assert_eq!(bob.messages(), vec!["hi"]);
        assert_eq!(hub.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_send_to_offline_user_is_discarded() {
        let hub = hub();
        let bob = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;

        hub.send("carol", sample_notification("alice", "carol", "hi"));

        assert!(wait_until(WAIT, || hub.stats().offline == 1).await);
        assert!(bob.written().is_empty());
        assert_eq!(hub.connection_of("bob").await, Some(bob.id()));
    }

    #[tokio::test]
    async fn test_unregister_twice_is_safe() {
        let hub = hub();
        let bob = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;

        hub.unregister("bob").await;
        hub.unregister("bob").await;
        hub.unregister("nobody").await;

        assert_eq!(hub.connection_of("bob").await, None);
        assert_eq!(bob.close_count(), 1);
        assert_eq!(hub.connected_users().await, 0);
    }

    #[tokio::test]
    async fn test_release_of_stale_connection_keeps_current_one() {
        let hub = hub();
        let stale = RecordingTransport::new();
        let current = RecordingTransport::new();
        hub.register("bob", stale.clone()).await;
        hub.register("bob", current.clone()).await;

        hub.release("bob", stale.id()).await;
        assert_eq!(hub.connection_of("bob").await, Some(current.id()));

        hub.release("bob", current.id()).await;
        assert_eq!(hub.connection_of("bob").await, None);
        assert!(current.wait_closed(WAIT).await);
    }

    #[tokio::test]
    async fn test_write_failure_removes_connection() {
        let hub = hub();
        let broken = RecordingTransport::failing();
        hub.register("bob", broken.clone()).await;

        hub.send("bob", sample_notification("alice", "bob", "hi"));

        assert!(broken.wait_closed(WAIT).await);
        assert_eq!(hub.connection_of("bob").await, None);
        assert_eq!(hub.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn test_full_backlog_drops_and_counts() {
        let config = DeliveryConfig {
            send_buffer: 1,
            hub_write_timeout_ms: 60_000,
            ..Default::default()
        };
        let hub = Hub::spawn(&config);
        let slow = RecordingTransport::gated();
        hub.register("bob", slow.clone()).await;

        // 第一条被 actor 取走并卡在写入上
        hub.send("bob", sample_notification("alice", "bob", "n1"));
        assert!(wait_until(WAIT, || slow.writes_started() == 1).await);

        // 第二条占满积压，第三条被丢弃
        hub.send("bob", sample_notification("alice", "bob", "n2"));
        hub.send("bob", sample_notification("alice", "bob", "n3"));
        assert_eq!(hub.stats().dropped, 1);

        slow.open_gate(2);
        assert!(slow.wait_for_writes(2, WAIT).await);
        assert_eq!(slow.messages(), vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = hub();
        let bob = RecordingTransport::new();
        let carol = RecordingTransport::new();
        hub.register("bob", bob.clone()).await;
        hub.register("carol", carol.clone()).await;

        hub.shutdown().await;
        assert!(bob.is_closed());
        assert!(carol.is_closed());
        assert!(!hub.is_running());

        // 关闭后的操作都是空操作
        hub.send("bob", sample_notification("alice", "bob", "late"));
        hub.unregister("bob").await;
        assert_eq!(hub.connection_of("bob").await, None);
        assert_eq!(hub.connected_users().await, 0);
        assert!(bob.written().is_empty());

        let late = RecordingTransport::new();
        hub.register("dave", late.clone()).await;
        assert!(late.is_closed());

        // 重复关闭立即返回
        tokio::time::timeout(WAIT, hub.shutdown()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connection_times_out_without_blocking_others() {
        let config = DeliveryConfig {
            hub_write_timeout_ms: 500,
            ..Default::default()
        };
        let hub = Hub::spawn(&config);
        let slow = RecordingTransport::gated();
        let carol = RecordingTransport::new();
        hub.register("bob", slow.clone()).await;
        hub.register("carol", carol.clone()).await;

        hub.send("bob", sample_notification("alice", "bob", "stuck"));
        hub.send("carol", sample_notification("alice", "carol", "hi"));

        assert!(carol.wait_for_writes(1, WAIT).await);
        assert!(slow.is_closed());
        assert!(slow.written().is_empty());
        assert_eq!(hub.connection_of("bob").await, None);
        assert_eq!(hub.stats().write_failures, 1);
        assert_eq!(hub.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_connected_users_counts_each_registered_user() {
        let hub = hub();
        for user in ["a", "b", "c"] {
            hub.register(user, RecordingTransport::new()).await;
        }
        assert_eq!(hub.connected_users().await, 3);
    }
}
