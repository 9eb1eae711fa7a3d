//! 通知生产者命令行工具
//!
//! 通过与 `POST /notifications` 相同的发布流程，向 Kafka 写入测试通知。

use std::sync::Arc;

use clap::Parser;
use notification_service::{Publisher, models::NewNotification, queue::KafkaQueueWriter};
use notify_shared::{
    config::{KafkaConfig, ObservabilityConfig},
    kafka::{KafkaProducer, topics},
    observability,
};
use tracing::{error, info};

/// 通知生产者
#[derive(Parser, Debug)]
#[command(name = "notification-producer")]
#[command(version, about = "向通知队列发布测试通知")]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Kafka brokers 地址
    #[arg(long, env = "NOTIFY_KAFKA__BROKERS", default_value = "localhost:9092")]
    brokers: String,

    /// 目标 topic
    #[arg(long, env = "NOTIFY_KAFKA__TOPIC", default_value = topics::NOTIFICATIONS)]
    topic: String,

    /// 发送者
    #[arg(short, long, default_value = "system")]
    sender: String,

    /// 接收者
    #[arg(short, long)]
    receiver: String,

    /// 通知内容，发送多条时会追加序号
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// 发送数量
    #[arg(short, long, default_value = "1")]
    count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let obs_config = ObservabilityConfig {
        log_level: cli.log_level.clone(),
        metrics_enabled: false,
        ..Default::default()
    };
    let _guard = observability::tracing::init("notification-producer", &obs_config)?;

    let kafka_config = KafkaConfig {
        brokers: cli.brokers.clone(),
        topic: cli.topic.clone(),
        ..Default::default()
    };
    let producer = KafkaProducer::new(&kafka_config)?;
    let publisher = Publisher::new(Arc::new(KafkaQueueWriter::new(producer, cli.topic.clone())));

    let mut failed = 0usize;
    for i in 0..cli.count {
        let message = if cli.count > 1 {
            format!("{} #{}", cli.message, i + 1)
        } else {
            cli.message.clone()
        };

        match publisher
            .publish(NewNotification::new(&cli.sender, &cli.receiver, message))
            .await
        {
            Ok(n) => info!(notification_id = %n.id, receiver = %n.receiver, "已发布"),
            Err(e) => {
                failed += 1;
                error!(error = %e, "发布失败");
            }
        }
    }

    info!(total = cli.count, failed, topic = %cli.topic, "发布完成");
    if failed > 0 {
        anyhow::bail!("{failed} 条通知发布失败");
    }

    Ok(())
}
