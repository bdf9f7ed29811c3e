//! 营销平台客户端
//!
//! 通过 `MarketingApiClient` trait 抽象推送行为。配置了地址时使用 HTTP 实现，
//! 否则使用只记录日志的实现，便于在没有营销平台的环境中验证消费管道。
//! [`RetryableApiClient`] 为任意实现加上失败捕获：推送失败时调用参数被写入失败 topic。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use wishlist_shared::config::MarketingApiConfig;
use wishlist_shared::observability::metrics::record_downstream_send;
use wishlist_shared::retryable::{FailureInterceptor, InvocationArgs, RetryableInterface};

use crate::error::WishlistError;

/// 营销平台客户端 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketingApiClient: Send + Sync {
    /// 推送一个操作信封
    async fn send_data(&self, payload: &Value) -> Result<(), WishlistError>;
}

// ---------------------------------------------------------------------------
// HTTP 实现
// ---------------------------------------------------------------------------

/// 以 JSON POST 推送到营销平台
pub struct HttpMarketingApiClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMarketingApiClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, WishlistError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WishlistError::DownstreamSend {
                status: None,
                message: format!("创建 HTTP 客户端失败: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MarketingApiClient for HttpMarketingApiClient {
    async fn send_data(&self, payload: &Value) -> Result<(), WishlistError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                record_downstream_send("error");
                WishlistError::DownstreamSend {
                    status: None,
                    message: format!("请求营销平台失败: {e}"),
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            record_downstream_send("error");
            let body = resp.text().await.unwrap_or_default();
            return Err(WishlistError::DownstreamSend {
                status: Some(status.as_u16()),
                message: format!("营销平台返回 HTTP {status}: {body}"),
            });
        }

        record_downstream_send("success");
        debug!(endpoint = %self.endpoint, status = %status, "营销平台推送成功");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 日志实现
// ---------------------------------------------------------------------------

/// 只打印推送内容，不发起网络请求
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMarketingApiClient;

#[async_trait]
impl MarketingApiClient for LoggingMarketingApiClient {
    async fn send_data(&self, payload: &Value) -> Result<(), WishlistError> {
        record_downstream_send("logged");
        info!(payload = %payload, "营销平台推送（仅记录）");
        Ok(())
    }
}

/// 按配置选择客户端实现
pub fn from_config(config: &MarketingApiConfig) -> Result<Box<dyn MarketingApiClient>, WishlistError> {
    match config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => {
            info!(endpoint, timeout_ms = config.timeout_ms, "使用 HTTP 营销平台客户端");
            Ok(Box::new(HttpMarketingApiClient::new(
                endpoint,
                Duration::from_millis(config.timeout_ms),
            )?))
        }
        None => {
            warn!("未配置营销平台地址，推送内容只记录日志");
            Ok(Box::new(LoggingMarketingApiClient))
        }
    }
}

// ---------------------------------------------------------------------------
// 失败捕获装饰
// ---------------------------------------------------------------------------

/// 带失败捕获的营销平台客户端
///
/// 推送失败时以 API 类型写入失败记录，参数映射为 `{"payload": <信封>}`。
pub struct RetryableApiClient<C> {
    inner: C,
    interceptor: FailureInterceptor,
    interface: RetryableInterface,
}

impl<C: MarketingApiClient> RetryableApiClient<C> {
    pub fn new(inner: C, interceptor: FailureInterceptor, interface: RetryableInterface) -> Self {
        Self {
            inner,
            interceptor,
            interface,
        }
    }
}

#[async_trait]
impl<C: MarketingApiClient> MarketingApiClient for RetryableApiClient<C> {
    async fn send_data(&self, payload: &Value) -> Result<(), WishlistError> {
        let args = InvocationArgs::new().arg("payload", payload.clone());
        self.interceptor
            .intercept(&self.interface, args, || self.inner.send_data(payload))
            .await
    }
}

#[async_trait]
impl<C: MarketingApiClient + ?Sized> MarketingApiClient for Box<C> {
    async fn send_data(&self, payload: &Value) -> Result<(), WishlistError> {
        (**self).send_data(payload).await
    }
}

#[async_trait]
impl<C: MarketingApiClient + ?Sized> MarketingApiClient for std::sync::Arc<C> {
    async fn send_data(&self, payload: &Value) -> Result<(), WishlistError> {
        (**self).send_data(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use wishlist_shared::error::SyncError;
    use wishlist_shared::test_utils::RecordingPublisher;

    fn api_interface() -> RetryableInterface {
        RetryableInterface::api(
            "marketing-send-data",
            "/marketing/data",
            "interface-failure-topic",
        )
    }

    #[tokio::test]
    async fn test_logging_client_accepts_everything() {
        let client = LoggingMarketingApiClient;
        assert!(client.send_data(&json!({"$add": {}})).await.is_ok());
    }

    #[test]
    fn test_from_config_without_endpoint() {
        let config = MarketingApiConfig::default();
        assert!(from_config(&config).is_ok());

        let config = MarketingApiConfig {
            endpoint: Some("http://marketing.local/data".to_string()),
            timeout_ms: 500,
        };
        assert!(from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_retryable_client_passes_success_through() {
        let mut inner = MockMarketingApiClient::new();
        inner.expect_send_data().times(1).returning(|_| Ok(()));

        let publisher = Arc::new(RecordingPublisher::new());
        let client = RetryableApiClient::new(
            inner,
            FailureInterceptor::new(publisher.clone()),
            api_interface(),
        );

        client.send_data(&json!({"$add": {}})).await.unwrap();
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_client_captures_failed_send() {
        let mut inner = MockMarketingApiClient::new();
        inner.expect_send_data().times(1).returning(|_| {
            Err(WishlistError::DownstreamSend {
                status: Some(503),
                message: "服务不可用".to_string(),
            })
        });

        let publisher = Arc::new(RecordingPublisher::new());
        let client = RetryableApiClient::new(
            inner,
            FailureInterceptor::new(publisher.clone()),
            api_interface(),
        );

        let payload = json!({"$add": {"attributes": {"product_id": "ADD:sku-42"}}});
        let err = client.send_data(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            WishlistError::Captured(ref inner) if matches!(
                **inner,
                WishlistError::DownstreamSend {
                    status: Some(503),
                    ..
                }
            )
        ));
        assert_eq!(err.reason(), "DOWNSTREAM_SEND");

        let sent = publisher.messages_to("interface-failure-topic");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].key.as_deref(),
            Some("{payload={$add={attributes={product_id=ADD:sku-42}}}}")
        );
        assert_eq!(
            sent[0].json(),
            json!({
                "type": "API",
                "resource": "/marketing/data",
                "interfaceName": "marketing-send-data",
                "payload": {"payload": payload}
            })
        );
    }

    #[tokio::test]
    async fn test_retryable_client_reports_dead_letter_failure() {
        let mut inner = MockMarketingApiClient::new();
        inner
            .expect_send_data()
            .returning(|_| Err(WishlistError::Transform("x".to_string())));

        let client = RetryableApiClient::new(
            inner,
            FailureInterceptor::new(Arc::new(RecordingPublisher::failing("broker 不可达"))),
            api_interface(),
        );

        let err = client.send_data(&json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            WishlistError::Shared(SyncError::DeadLetterPublish { .. })
        ));
    }
}
