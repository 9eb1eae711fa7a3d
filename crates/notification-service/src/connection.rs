//! 连接生命周期
//!
//! 一条连接注册到 Hub 后同时运行两个任务：
//! - 读取任务：读取入站帧，业务消息只记录日志；任何读取活动都会推迟空闲截止时间
//! - 保活任务：按固定间隔发送 ping，失败即结束
//!
//! 两个任务共享连接的 done 信号，任意一方结束都会让另一方退出；
//! 两者都停止后只执行一次清理（从 Hub 释放并关闭连接）。

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use notify_shared::config::DeliveryConfig;
use notify_shared::observability::metrics;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::hub::Hub;
use crate::transport::{Inbound, MessageReader, Transport, split_websocket};

/// 连接保活参数
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub ping_interval: Duration,
    /// 超过该时长没有任何入站帧即断开
    pub pong_wait: Duration,
    pub write_timeout: Duration,
}

impl From<&DeliveryConfig> for ConnectionSettings {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_wait: config.pong_wait(),
            write_timeout: config.write_timeout(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

/// 连接结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 本端关闭：被新连接顶替或 Hub 停止
    Closed,
    /// 对端发送了关闭帧
    PeerClosed,
    /// 入站流结束
    PeerGone,
    ReadError,
    /// 空闲超时
    Inactive,
    PingFailed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::PeerClosed => "peer_closed",
            Self::PeerGone => "peer_gone",
            Self::ReadError => "read_error",
            Self::Inactive => "inactive",
            Self::PingFailed => "ping_failed",
        }
    }
}

/// 处理一条完成升级的 WebSocket
pub async fn handle_socket(socket: WebSocket, user: String, hub: Hub, settings: ConnectionSettings) {
    let (transport, reader) = split_websocket(socket, settings.write_timeout);
    serve_connection(hub, user, Arc::new(transport), reader, settings).await;
}

/// 注册连接并运行读取与保活任务，直到连接结束
#[instrument(skip_all, fields(user = %user, connection_id = %transport.id()))]
pub async fn serve_connection<R>(
    hub: Hub,
    user: String,
    transport: Arc<dyn Transport>,
    reader: R,
    settings: ConnectionSettings,
) -> CloseReason
where
    R: MessageReader,
{
    let done = transport.done();

    hub.register(user.clone(), transport.clone()).await;
    metrics::record_ws_connection("opened");
    info!("WebSocket 连接已建立");

    let liveness = tokio::spawn(liveness_duty(
        transport.clone(),
        done.clone(),
        settings.ping_interval,
    ));
    let mut reason = read_duty(reader, &done, settings.pong_wait, &user).await;

    done.cancel();
    if let Ok(Some(ping_failure)) = liveness.await
        && reason == CloseReason::Closed
    {
        reason = ping_failure;
    }

    hub.release(user.as_str(), transport.id()).await;
    transport.close().await;

    metrics::record_ws_connection("closed");
    info!(reason = reason.as_str(), "WebSocket 连接已断开");
    reason
}

async fn read_duty<R>(
    mut reader: R,
    done: &CancellationToken,
    pong_wait: Duration,
    user: &str,
) -> CloseReason
where
    R: MessageReader,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = tokio::select! {
            biased;

            _ = done.cancelled() => return CloseReason::Closed,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(?pong_wait, "连接空闲超时");
                return CloseReason::Inactive;
            }
            frame = reader.read_message() => frame,
        };

        let inbound = match frame {
            None => return CloseReason::PeerGone,
            Some(Err(e)) => {
                debug!(error = %e, "读取失败");
                return CloseReason::ReadError;
            }
            Some(Ok(Inbound::Close)) => return CloseReason::PeerClosed,
            Some(Ok(inbound)) => inbound,
        };

        deadline = Instant::now() + pong_wait;
        match inbound {
            Inbound::Text(text) => info!(user, message = %text, "收到客户端消息"),
            Inbound::Binary(data) => debug!(user, len = data.len(), "收到二进制消息"),
            Inbound::Ping | Inbound::Pong | Inbound::Close => {}
        }
    }
}

/// 返回 `Some` 表示因 ping 失败而结束
async fn liveness_duty(
    transport: Arc<dyn Transport>,
    done: CancellationToken,
    interval: Duration,
) -> Option<CloseReason> {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = done.cancelled() => return None,
            _ = ticker.tick() => {
                if let Err(e) = transport.ping().await {
                    debug!(error = %e, "ping 失败");
                    done.cancel();
                    return Some(CloseReason::PingFailed);
                }
            }
        }
    }
}
