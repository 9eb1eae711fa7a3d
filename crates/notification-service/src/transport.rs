//! 连接传输抽象
//!
//! `Transport` 是连接的写入半边，由 Hub 与保活任务共享；
//! `MessageReader` 是读取半边，只归读取任务所有。
//! WebSocket 实现把 axum 的 `WebSocket` 拆成这两半。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::models::Notification;

/// 连接标识，每次建立连接都会分配新的值
pub type ConnectionId = Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("连接已关闭")]
    Closed,

    #[error("写入超时: {0:?}")]
    WriteTimeout(Duration),

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("传输错误: {0}")]
    Io(String),
}

/// 连接写入半边
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// 连接的 done 信号，连接关闭时被取消
    fn done(&self) -> CancellationToken;

    async fn write_json(&self, notification: &Notification) -> Result<(), TransportError>;

    async fn ping(&self) -> Result<(), TransportError>;

    /// 关闭连接并触发连接的 done 信号，可重复调用
    async fn close(&self);
}

/// 入站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// 连接读取半边
#[async_trait]
pub trait MessageReader: Send {
    /// 读取下一帧，`None` 表示对端已断开
    async fn read_message(&mut self) -> Option<Result<Inbound, TransportError>>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// 拆分 WebSocket 为写入半边与读取半边
pub fn split_websocket(socket: WebSocket, write_timeout: Duration) -> (WsTransport, WsReader) {
    let (sink, stream) = socket.split();
    let transport = WsTransport {
        id: Uuid::new_v4(),
        sink: Mutex::new(sink),
        done: CancellationToken::new(),
        write_timeout,
        closed: AtomicBool::new(false),
    };
    (transport, WsReader { stream })
}

pub struct WsTransport {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    done: CancellationToken,
    write_timeout: Duration,
    closed: AtomicBool,
}

impl WsTransport {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(_) => Err(TransportError::WriteTimeout(self.write_timeout)),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    async fn write_json(&self, notification: &Notification) -> Result<(), TransportError> {
        let text = serde_json::to_string(notification)?;
        self.write(Message::Text(text.into())).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.write(Message::Ping(Default::default())).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.done.cancel();

        let mut sink = self.sink.lock().await;
        let frame = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "closing".into(),
        }));
        // 对端可能早已断开，关闭帧发不出去不影响结果
        let _ = tokio::time::timeout(self.write_timeout, sink.send(frame)).await;
        let _ = tokio::time::timeout(self.write_timeout, sink.close()).await;
        debug!(connection_id = %self.id, "WebSocket 已关闭");
    }
}

pub struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageReader for WsReader {
    async fn read_message(&mut self) -> Option<Result<Inbound, TransportError>> {
        let frame = match self.stream.next().await? {
            Ok(Message::Text(text)) => Inbound::Text(text.to_string()),
            Ok(Message::Binary(data)) => Inbound::Binary(data.to_vec()),
            Ok(Message::Ping(_)) => Inbound::Ping,
            Ok(Message::Pong(_)) => Inbound::Pong,
            Ok(Message::Close(_)) => Inbound::Close,
            Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
        };
        Some(Ok(frame))
    }
}
