//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_pipeline_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 描述消费管道的指标，出现在 /metrics 的 HELP 注释中
fn register_pipeline_metrics(service_name: &str) {
    metrics::describe_counter!(
        "wishlist_records_received_total",
        "Total number of records received from subscribed topics"
    );
    metrics::describe_counter!(
        "wishlist_records_failed_total",
        "Total number of records whose handling failed"
    );
    metrics::describe_counter!(
        "wishlist_offsets_committed_total",
        "Total number of manually committed offsets"
    );
    metrics::describe_counter!(
        "wishlist_dead_letters_published_total",
        "Total number of failure payloads written to the failure topic"
    );
    metrics::describe_counter!(
        "wishlist_downstream_sends_total",
        "Total number of marketing API sends"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
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

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录收到一条消息
#[inline]
pub fn record_received(topic: &str) {
    metrics::counter!("wishlist_records_received_total", "topic" => topic.to_string())
        .increment(1);
}

/// 记录一条消息处理失败
#[inline]
pub fn record_failed(topic: &str, reason: &str) {
    metrics::counter!(
        "wishlist_records_failed_total",
        "topic" => topic.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录一次营销平台发送
#[inline]
pub fn record_downstream_send(status: &str) {
    metrics::counter!("wishlist_downstream_sends_total", "status" => status.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_received("message-process-topic");
        record_failed("message-process-topic", "TRANSFORM");
        record_downstream_send("success");
    }
}
