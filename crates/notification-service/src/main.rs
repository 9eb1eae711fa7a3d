//! 实时通知服务
//!
//! 提供通知发布 REST API 与 WebSocket 实时推送，后台消费持久队列完成持久化和投递。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, middleware, routing::get};
use notification_service::{
    Hub, Pipeline, Publisher,
    connection::ConnectionSettings,
    queue::{KafkaQueueReader, KafkaQueueWriter, QueueWriter, memory_queue},
    repository::{MIGRATOR, MemoryNotificationRepository, NotificationRepository, NotificationRepositoryTrait},
    routes,
    state::AppState,
};
use notify_shared::{
    config::AppConfig,
    database::Database,
    kafka::KafkaProducer,
    observability::{self, middleware as obs_middleware},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const SERVICE_NAME: &str = "notification-service";

/// 启动时构建完成的后端组件
struct Backends {
    writer: Arc<dyn QueueWriter>,
    repository: Arc<dyn NotificationRepositoryTrait>,
    /// 单机模式下为 None
    database: Option<Database>,
    pipeline: Pipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        standalone = config.standalone,
        "Starting {} on {}",
        config.service_name,
        config.server_addr()
    );

    // 队列或存储客户端初始化失败属于致命错误，直接退出
    let hub = Hub::spawn(&config.delivery);
    let backends = if config.standalone {
        standalone_backends(&config, hub.clone())
    } else {
        kafka_backends(&config, hub.clone()).await?
    };

    let state = AppState::new(
        Publisher::new(backends.writer.clone()),
        backends.repository.clone(),
        hub,
        ConnectionSettings::from(&config.delivery),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = backends.database.clone();
                move || readiness_check(db_for_ready.clone())
            }),
        )
        .layer(cors)
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 已升级的 WebSocket 不在 axum 的等待范围内，先停管道以关闭所有连接
    let grace = config.delivery.shutdown_grace();
    let pipeline = backends.pipeline;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            pipeline.shutdown(grace).await;
        })
        .await?;

    if let Some(db) = backends.database {
        db.close().await;
    }

    info!("Server shutdown complete");

    Ok(())
}

/// 单机模式：内存队列 + 内存存储
fn standalone_backends(config: &AppConfig, hub: Hub) -> Backends {
    warn!("Running in standalone mode, notifications are kept in memory only");

    let (writer, reader) = memory_queue(config.delivery.send_buffer);
    let repository: Arc<dyn NotificationRepositoryTrait> =
        Arc::new(MemoryNotificationRepository::new());
    let pipeline = Pipeline::start(
        reader,
        repository.clone(),
        hub,
        None,
        config.delivery.fetch_backoff(),
    );

    Backends {
        writer: Arc::new(writer),
        repository,
        database: None,
        pipeline,
    }
}

/// 生产模式：Kafka 队列 + PostgreSQL 存储
async fn kafka_backends(config: &AppConfig, hub: Hub) -> anyhow::Result<Backends> {
    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;

    let producer = KafkaProducer::new(&config.kafka)?;
    let writer = KafkaQueueWriter::new(producer.clone(), config.kafka.topic.clone());
    let reader = KafkaQueueReader::subscribe(&config.kafka)?;

    let dead_letter = config.kafka.dead_letter_topic.as_ref().map(|topic| {
        info!(topic = %topic, "Dead letter topic enabled");
        Arc::new(KafkaQueueWriter::new(producer.clone(), topic.clone())) as Arc<dyn QueueWriter>
    });

    let repository: Arc<dyn NotificationRepositoryTrait> =
        Arc::new(NotificationRepository::new(db.pool().clone()));
    let pipeline = Pipeline::start(
        reader,
        repository.clone(),
        hub,
        dead_letter,
        config.delivery.fetch_backoff(),
    );

    Ok(Backends {
        writer: Arc::new(writer),
        repository,
        database: Some(db),
        pipeline,
    })
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(db: Option<Database>) -> Json<serde_json::Value> {
    let db_status = match &db {
        Some(db) => match tokio::time::timeout(Duration::from_secs(3), db.health_check()).await {
            Ok(Ok(())) => "ok",
            _ => "fail",
        },
        None => "skipped",
    };

    Json(serde_json::json!({
        "status": if db_status == "fail" { "degraded" } else { "ok" },
        "service": SERVICE_NAME,
        "checks": {
            "database": db_status
        }
    }))
}
