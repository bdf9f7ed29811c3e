//! 心愿单消费服务
//!
//! 手动确认消费商品心愿单 topic，推送 ADD/REMOVE 操作到营销平台，
//! 并提供 REST 触发入口。

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use wishlist_consumer::{
    client::{self, MarketingApiClient, RetryableApiClient},
    consumer::WishlistConsumer,
    dispatcher::ConsumptionDispatcher,
    handler::{ProductWishlistHandler, RecordHandler, Retryable},
    registry::HandlerRegistry,
    routes::{self, TriggerState},
};
use wishlist_shared::{
    config::AppConfig,
    kafka::{KafkaProducer, MessagePublisher},
    observability,
    retryable::{FailureInterceptor, RetryableInterface},
};

const SERVICE_NAME: &str = "wishlist-consumer";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_default();

    let obs_config = config
        .observability
        .clone()
        .with_service_name(SERVICE_NAME);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        "Starting wishlist-consumer on {}",
        config.server_addr()
    );

    let publisher: Arc<dyn MessagePublisher> = Arc::new(KafkaProducer::new(&config.kafka)?);
    let interceptor = FailureInterceptor::new(publisher.clone());

    // 营销平台推送失败以 API 类型写入失败 topic
    let api_interface = RetryableInterface::api(
        config.retryable.api_interface_name.as_str(),
        config.retryable.api_resource.as_str(),
        config.topics.failure.as_str(),
    )
    .with_max_retries(config.retryable.max_retries);
    let api_client: Arc<dyn MarketingApiClient> = Arc::new(RetryableApiClient::new(
        client::from_config(&config.marketing_api)?,
        interceptor.clone(),
        api_interface,
    ));

    // 消息处理失败以 CONSUMER 类型写入失败 topic
    let consumer_interface = RetryableInterface::consumer(
        config.retryable.consumer_interface_name.as_str(),
        config.topics.product_wishlist.as_str(),
        config.topics.failure.as_str(),
    )
    .with_max_retries(config.retryable.max_retries);
    let product_handler: Arc<dyn RecordHandler> = Arc::new(Retryable::new(
        ProductWishlistHandler::product(config.topics.product_wishlist.as_str(), api_client),
        interceptor,
        consumer_interface,
    ));

    let registry = Arc::new(HandlerRegistry::new(vec![product_handler])?);
    let dispatcher = ConsumptionDispatcher::new(registry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumer_tasks = Vec::with_capacity(config.kafka.concurrency.max(1));
    for idx in 0..config.kafka.concurrency.max(1) {
        let consumer = WishlistConsumer::new(&config.kafka, dispatcher.clone())?;
        let shutdown = shutdown_rx.clone();
        consumer_tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(shutdown).await {
                error!(consumer = idx, error = %e, "消费者异常退出");
            }
        }));
    }
    info!(concurrency = consumer_tasks.len(), "消费者已启动");

    let app = routes::router(TriggerState::new(
        publisher,
        config.topics.product_wishlist.as_str(),
    ));
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP 服务异常退出");
        }
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for task in consumer_tasks {
        if let Err(e) = task.await {
            error!(error = %e, "消费者任务 join 失败");
        }
    }
    if let Err(e) = server.await {
        error!(error = %e, "HTTP 服务任务 join 失败");
    }

    info!("Shutdown complete");
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
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
                error!(error = %e, "注册 SIGTERM 处理器失败");
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
