//! 按 topic 划分的消息处理器
//!
//! 每个处理器声明自己负责的 topic，`handle` 完成一次可失败的业务处理，
//! `process` 在其外层保证：无论成功失败，消息都在处理结束后被确认且只确认一次。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};
use wishlist_shared::kafka::{Acknowledgment, InboundRecord};
use wishlist_shared::observability::metrics::record_failed;
use wishlist_shared::retryable::{FailureInterceptor, InvocationArgs, RetryableInterface};

use crate::client::MarketingApiClient;
use crate::error::WishlistError;
use crate::payload::{Operation, build_envelope};
use crate::transformer::{AttributeTransformer, ProductAttributes};

/// 消息处理器 trait
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// 处理器负责的 topic
    fn topic(&self) -> &str;

    fn supports(&self, topic: &str) -> bool {
        self.topic() == topic
    }

    /// 可失败的业务处理
    async fn handle(&self, record: &InboundRecord) -> Result<(), WishlistError>;

    /// 处理并确认
    ///
    /// 失败只记录日志不向外传播，确认严格发生在 `handle` 结束之后。
    /// 失败消息不会被重新投递。
    async fn process(&self, record: InboundRecord, ack: Acknowledgment) {
        match self.handle(&record).await {
            Ok(()) => {
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "消息处理完成"
                );
            }
            Err(e) => {
                record_failed(&record.topic, e.reason());
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    key = ?record.key,
                    error = %e,
                    "消息处理失败，确认后丢弃"
                );
            }
        }

        ack.acknowledge();
    }
}

// ---------------------------------------------------------------------------
// 心愿单处理器模板
// ---------------------------------------------------------------------------

/// 心愿单处理器
///
/// 推断操作、调用转换器、包装信封并推送到营销平台。
/// 不同业务的处理器只在转换器上有差别。
pub struct WishlistHandler<T> {
    topic: String,
    transformer: T,
    client: Arc<dyn MarketingApiClient>,
}

/// 商品心愿单处理器
pub type ProductWishlistHandler = WishlistHandler<ProductAttributes>;

impl<T: AttributeTransformer> WishlistHandler<T> {
    pub fn new(topic: impl Into<String>, transformer: T, client: Arc<dyn MarketingApiClient>) -> Self {
        Self {
            topic: topic.into(),
            transformer,
            client,
        }
    }
}

impl ProductWishlistHandler {
    pub fn product(topic: impl Into<String>, client: Arc<dyn MarketingApiClient>) -> Self {
        Self::new(topic, ProductAttributes, client)
    }
}

#[async_trait]
impl<T: AttributeTransformer> RecordHandler for WishlistHandler<T> {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn handle(&self, record: &InboundRecord) -> Result<(), WishlistError> {
        let value = record
            .value
            .as_deref()
            .ok_or_else(|| WishlistError::Tombstone {
                topic: record.topic.clone(),
                offset: record.offset,
            })?;

        let operation = Operation::infer(value);
        let attributes = self.transformer.transform(value)?;
        let envelope = build_envelope(operation, attributes);

        info!(
            topic = %record.topic,
            offset = record.offset,
            operation = %operation,
            "推送心愿单数据"
        );

        self.client.send_data(&envelope.to_value()).await
    }
}

// ---------------------------------------------------------------------------
// 失败捕获装饰
// ---------------------------------------------------------------------------

/// 带失败捕获的处理器
///
/// `handle` 失败时以 CONSUMER 类型把原始消息写入失败 topic，再把错误交给 `process` 记录。
pub struct Retryable<H> {
    inner: H,
    interceptor: FailureInterceptor,
    interface: RetryableInterface,
}

impl<H: RecordHandler> Retryable<H> {
    pub fn new(inner: H, interceptor: FailureInterceptor, interface: RetryableInterface) -> Self {
        Self {
            inner,
            interceptor,
            interface,
        }
    }
}

#[async_trait]
impl<H: RecordHandler> RecordHandler for Retryable<H> {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn supports(&self, topic: &str) -> bool {
        self.inner.supports(topic)
    }

    async fn handle(&self, record: &InboundRecord) -> Result<(), WishlistError> {
        let args = InvocationArgs::new().record("record", record);
        self.interceptor
            .intercept(&self.interface, args, || self.inner.handle(record))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMarketingApiClient;
    use serde_json::json;
    use wishlist_shared::retryable::CapturedFailure;
    use wishlist_shared::test_utils::{
        RecordingPublisher, test_delivery, test_record, test_tombstone,
    };

    const TOPIC: &str = "message-process-topic";

    fn product_handler(client: MockMarketingApiClient) -> ProductWishlistHandler {
        ProductWishlistHandler::product(TOPIC, Arc::new(client))
    }

    #[test]
    fn test_supports_own_topic_only() {
        let handler = product_handler(MockMarketingApiClient::new());
        assert_eq!(handler.topic(), TOPIC);
        assert!(handler.supports(TOPIC));
        assert!(!handler.supports("other-topic"));
    }

    #[tokio::test]
    async fn test_handle_sends_add_envelope() {
        let mut client = MockMarketingApiClient::new();
        client
            .expect_send_data()
            .withf(|payload| {
                *payload == json!({"$add": {"attributes": {"product_id": "ADD:sku-42"}}})
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = product_handler(client);
        let record = test_record(TOPIC, Some("k1"), "ADD:sku-42", 0);
        handler.handle(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_sends_remove_envelope() {
        let mut client = MockMarketingApiClient::new();
        client
            .expect_send_data()
            .withf(|payload| {
                *payload == json!({"$remove": {"attributes": {"product_id": "REMOVE:sku-42"}}})
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = product_handler(client);
        let record = test_record(TOPIC, None, "REMOVE:sku-42", 0);
        handler.handle(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_value_is_sent_as_remove() {
        let mut client = MockMarketingApiClient::new();
        client
            .expect_send_data()
            .withf(|payload| *payload == json!({"$remove": {"attributes": {"product_id": ""}}}))
            .times(1)
            .returning(|_| Ok(()));

        let handler = product_handler(client);
        let record = test_record(TOPIC, None, "", 0);
        handler.handle(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_tombstone_fails_before_send() {
        let mut client = MockMarketingApiClient::new();
        client.expect_send_data().times(0);

        let handler = product_handler(client);
        let record = test_tombstone(TOPIC, Some("k1"), 4);
        assert!(matches!(
            handler.handle(&record).await,
            Err(WishlistError::Tombstone { offset: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_process_acknowledges_once_after_success() {
        let mut client = MockMarketingApiClient::new();
        client.expect_send_data().times(1).returning(|_| Ok(()));

        let handler = product_handler(client);
        let record = test_record(TOPIC, Some("k1"), "ADD:sku-42", 5);
        let (ack, committer) = test_delivery(&record);

        handler.process(record, ack).await;
        assert_eq!(committer.commits(), vec![(TOPIC.to_string(), 0, 5)]);
    }

    #[tokio::test]
    async fn test_process_acknowledges_once_after_failure() {
        let mut client = MockMarketingApiClient::new();
        client.expect_send_data().times(1).returning(|_| {
            Err(WishlistError::DownstreamSend {
                status: Some(500),
                message: "内部错误".to_string(),
            })
        });

        let handler = product_handler(client);
        let record = test_record(TOPIC, Some("k1"), "ADD:sku-42", 9);
        let (ack, committer) = test_delivery(&record);

        handler.process(record, ack).await;
        assert_eq!(committer.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_retryable_handler_captures_failed_record() {
        let publisher = Arc::new(RecordingPublisher::new());
        let handler = Retryable::new(
            product_handler(MockMarketingApiClient::new()),
            FailureInterceptor::new(publisher.clone()),
            RetryableInterface::consumer(
                "product-wishlist-consumer",
                TOPIC,
                "interface-failure-topic",
            ),
        );
        assert!(handler.supports(TOPIC));

        let record = test_tombstone(TOPIC, Some("k1"), 3);
        let (ack, committer) = test_delivery(&record);
        handler.process(record, ack).await;

        assert_eq!(committer.commit_count(), 1);

        let sent = publisher.messages_to("interface-failure-topic");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key.as_deref(), Some("k1"));

        let body = sent[0].json();
        assert_eq!(body["type"], "CONSUMER");
        assert_eq!(body["resource"], TOPIC);
        assert_eq!(body["interfaceName"], "product-wishlist-consumer");
        assert_eq!(body["payload"]["offset"], 3);
        assert!(body["payload"]["value"].is_null());
    }

    #[tokio::test]
    async fn test_retryable_handler_acknowledges_when_dead_letter_fails() {
        let handler = Retryable::new(
            product_handler(MockMarketingApiClient::new()),
            FailureInterceptor::new(Arc::new(RecordingPublisher::failing("broker 不可达"))),
            RetryableInterface::consumer("c", TOPIC, "interface-failure-topic"),
        );

        let record = test_tombstone(TOPIC, Some("k1"), 0);
        let (ack, committer) = test_delivery(&record);
        handler.process(record, ack).await;

        assert_eq!(committer.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_retryable_handler_skips_failure_captured_by_client() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());

        let mut client = MockMarketingApiClient::new();
        client.expect_send_data().times(1).returning(|_| {
            Err(WishlistError::DownstreamSend {
                status: Some(503),
                message: "服务不可用".to_string(),
            }
            .into_captured())
        });

        let handler = Retryable::new(
            product_handler(client),
            interceptor,
            RetryableInterface::consumer("c", TOPIC, "interface-failure-topic"),
        );

        let record = test_record(TOPIC, Some("k1"), "ADD:sku-42", 0);
        let err = handler.handle(&record).await.unwrap_err();
        assert_eq!(err.reason(), "DOWNSTREAM_SEND");
        assert!(publisher.messages().is_empty());
    }
}
