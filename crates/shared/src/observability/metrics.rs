//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "notifications_published_total",
        "Notifications appended to the durable queue"
    );
    metrics::describe_counter!(
        "notifications_ingested_total",
        "Queue entries processed by the ingestion consumer, by outcome"
    );
    metrics::describe_histogram!(
        "notification_ingest_duration_seconds",
        "Time spent persisting and handing off one queue entry"
    );

    metrics::describe_counter!("hub_deliveries_total", "Hub delivery attempts, by outcome");
    metrics::describe_counter!(
        "hub_dropped_sends_total",
        "Send requests dropped because the hub backlog was full"
    );
    metrics::describe_gauge!("hub_active_connections", "Users with a live connection");
    metrics::describe_counter!("ws_connections_total", "WebSocket lifecycle events");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录通知写入队列的结果
#[inline]
pub fn record_notification_published(status: &str) {
    metrics::counter!(
        "notifications_published_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一条队列条目的处理结果
///
/// outcome: delivered / malformed / persist_failed
#[inline]
pub fn record_notification_ingested(outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "notifications_ingested_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "notification_ingest_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录 Hub 的一次投递
///
/// outcome: written / offline / write_failed
#[inline]
pub fn record_hub_delivery(outcome: &str) {
    metrics::counter!(
        "hub_deliveries_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录因积压而丢弃的投递请求
#[inline]
pub fn record_hub_dropped_send() {
    metrics::counter!("hub_dropped_sends_total").increment(1);
}

/// 更新在线连接数
#[inline]
pub fn set_hub_active_connections(count: usize) {
    metrics::gauge!("hub_active_connections").set(count as f64);
}

/// 记录 WebSocket 生命周期事件
///
/// event: opened / closed / evicted
#[inline]
pub fn record_ws_connection(event: &str) {
    metrics::counter!(
        "ws_connections_total",
        "event" => event.to_string()
    )
    .increment(1);
}
