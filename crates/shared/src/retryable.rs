//! 接口失败拦截
//!
//! 任何被 [`RetryableInterface`] 标注的调用都可以通过 [`FailureInterceptor::intercept`]
//! 执行：调用成功时结果原样返回；调用失败时把失败现场写入该调用点的失败 topic，
//! 再把标记为已记录的原始错误返回给调用方。
//!
//! 标注可以嵌套（处理器内部调用被标注的客户端），同一次失败只由最内层记录一次，
//! 外层看到 [`CapturedFailure::is_captured`] 为真的错误时直接透传。
//!
//! 拦截器不依赖运行时反射：调用点通过 [`InvocationArgs`] 显式提供参数名和参数值，
//! 因此对任意参数个数、任意签名的调用都一视同仁。
//!
//! "retryable" 只表示该接口的失败会被捕获记录，拦截器本身不会重新执行调用。

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::dlq::{DlqProducer, FailurePayload, FailureType};
use crate::error::SyncError;
use crate::kafka::{InboundRecord, MessagePublisher};

/// 默认最大重试次数（保留字段）
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认重试计数 header（保留字段）
pub const DEFAULT_RETRY_COUNT_HEADER: &str = "x-retry-count";

// ---------------------------------------------------------------------------
// RetryableInterface 调用点标注
// ---------------------------------------------------------------------------

/// 失败捕获标注
///
/// 每个被拦截的调用点持有一份，描述失败记录的类型、来源和投递目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableInterface {
    pub interface_type: FailureType,
    /// API 地址或 Kafka topic
    pub interface_name: String,
    /// API 地址或 Kafka topic
    pub resource: String,
    /// 失败记录写入的 topic
    pub failure_topic: String,
    /// 保留字段：当前不读取也不递增
    pub max_retries: u32,
    /// 保留字段：当前不读取也不写入
    pub retry_count_header: String,
}

impl RetryableInterface {
    fn new(
        interface_type: FailureType,
        interface_name: impl Into<String>,
        resource: impl Into<String>,
        failure_topic: impl Into<String>,
    ) -> Self {
        Self {
            interface_type,
            interface_name: interface_name.into(),
            resource: resource.into(),
            failure_topic: failure_topic.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_count_header: DEFAULT_RETRY_COUNT_HEADER.to_string(),
        }
    }

    /// 消费类接口：失败时记录原始消息
    pub fn consumer(
        interface_name: impl Into<String>,
        resource: impl Into<String>,
        failure_topic: impl Into<String>,
    ) -> Self {
        Self::new(FailureType::Consumer, interface_name, resource, failure_topic)
    }

    /// API 类接口：失败时记录调用参数
    pub fn api(
        interface_name: impl Into<String>,
        resource: impl Into<String>,
        failure_topic: impl Into<String>,
    ) -> Self {
        Self::new(FailureType::Api, interface_name, resource, failure_topic)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

// ---------------------------------------------------------------------------
// InvocationArgs 显式的调用参数
// ---------------------------------------------------------------------------

/// 单个调用参数
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Record(InboundRecord),
    Value(Value),
}

impl Argument {
    fn to_json(&self) -> Result<Value, SyncError> {
        match self {
            Self::Record(record) => Ok(serde_json::to_value(record)?),
            Self::Value(value) => Ok(value.clone()),
        }
    }
}

/// 按声明顺序排列的 参数名→参数值 列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationArgs {
    args: Vec<(String, Argument)>,
}

impl InvocationArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个消息记录参数
    pub fn record(mut self, name: impl Into<String>, record: &InboundRecord) -> Self {
        self.args
            .push((name.into(), Argument::Record(record.clone())));
        self
    }

    /// 追加一个普通参数
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.push((name.into(), Argument::Value(value.into())));
        self
    }

    /// 第一个消息记录类型的参数
    pub fn find_record(&self) -> Option<&InboundRecord> {
        self.args.iter().find_map(|(_, arg)| match arg {
            Argument::Record(record) => Some(record),
            Argument::Value(_) => None,
        })
    }

    /// 转换为保序的 JSON 对象
    pub fn to_map(&self) -> Result<Map<String, Value>, SyncError> {
        let mut map = Map::new();
        for (name, arg) in &self.args {
            map.insert(name.clone(), arg.to_json()?);
        }
        Ok(map)
    }
}

/// 参数映射的字符串形式，作为 API 类失败记录的消息 key
///
/// 格式为 `{a=1, b=2}`：字符串不加引号，嵌套对象同样展开为 `{k=v}`，
/// 数组展开为 `[x, y]`。
pub fn render_key(arguments: &Map<String, Value>) -> String {
    render_object(arguments)
}

fn render_object(map: &Map<String, Value>) -> String {
    let parts: Vec<String> = map
        .iter()
        .map(|(name, value)| format!("{name}={}", render_value(value)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => render_object(map),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.to_string(),
    }
}

/// 可标记为"已写入失败 topic"的错误
///
/// 拦截器记录失败后用 `into_captured` 标记错误，外层拦截器据此跳过重复记录。
pub trait CapturedFailure: Sized {
    fn is_captured(&self) -> bool;

    fn into_captured(self) -> Self;
}

// ---------------------------------------------------------------------------
// FailureInterceptor
// ---------------------------------------------------------------------------

/// 失败拦截器
#[derive(Clone)]
pub struct FailureInterceptor {
    dlq: DlqProducer,
}

impl FailureInterceptor {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            dlq: DlqProducer::new(publisher),
        }
    }

    /// 执行被标注的调用
    ///
    /// 调用失败时先写失败记录，再返回标记为已记录的原始错误。
    /// 错误已被内层拦截器记录过时直接透传，不再写第二条。
    /// 写失败记录本身出错时，返回的是投递错误而不是原始错误，且不会再做任何补救投递。
    pub async fn intercept<T, E, F, Fut>(
        &self,
        interface: &RetryableInterface,
        args: InvocationArgs,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SyncError> + CapturedFailure + Display,
    {
        match operation().await {
            Ok(value) => Ok(value),
            Err(err) if err.is_captured() => {
                debug!(
                    interface_name = %interface.interface_name,
                    error = %err,
                    "失败已由内层调用记录，跳过"
                );
                Err(err)
            }
            Err(err) => {
                debug!(
                    interface_name = %interface.interface_name,
                    interface_type = %interface.interface_type,
                    error = %err,
                    "被标注的调用失败，记录失败现场"
                );
                self.capture(interface, &args).await.map_err(E::from)?;
                Err(err.into_captured())
            }
        }
    }

    /// 按接口类型构造失败记录并投递
    pub async fn capture(
        &self,
        interface: &RetryableInterface,
        args: &InvocationArgs,
    ) -> Result<(), SyncError> {
        match interface.interface_type {
            FailureType::Consumer => {
                let record = args.find_record().ok_or_else(|| SyncError::MissingRecord {
                    interface_name: interface.interface_name.clone(),
                })?;

                let failure = FailurePayload::consumer(
                    interface.resource.as_str(),
                    interface.interface_name.as_str(),
                    record,
                )?;
                self.dlq
                    .send_to_dlq(&interface.failure_topic, record.key.as_deref(), &failure)
                    .await
            }
            FailureType::Api => {
                let arguments = args.to_map()?;
                let key = render_key(&arguments);
                let failure = FailurePayload::api(
                    interface.resource.as_str(),
                    interface.interface_name.as_str(),
                    arguments,
                );

                self.dlq
                    .send_to_dlq(&interface.failure_topic, Some(&key), &failure)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingPublisher;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    enum CallError {
        #[error("调用失败: {0}")]
        Failed(String),
        #[error(transparent)]
        Shared(#[from] SyncError),
        #[error(transparent)]
        Captured(Box<CallError>),
    }

    impl CapturedFailure for CallError {
        fn is_captured(&self) -> bool {
            matches!(self, CallError::Captured(_))
        }

        fn into_captured(self) -> Self {
            if self.is_captured() {
                self
            } else {
                CallError::Captured(Box::new(self))
            }
        }
    }

    fn is_failed(result: &Result<(), CallError>) -> bool {
        match result {
            Err(CallError::Captured(inner)) => matches!(**inner, CallError::Failed(_)),
            _ => false,
        }
    }

    fn consumer_interface() -> RetryableInterface {
        RetryableInterface::consumer("product-consumer", "t", "interface-failure-topic")
    }

    fn api_interface() -> RetryableInterface {
        RetryableInterface::api("f", "/api/f", "interface-failure-topic")
    }

    #[test]
    fn test_reserved_retry_fields_have_defaults() {
        let interface = consumer_interface();
        assert_eq!(interface.max_retries, 3);
        assert_eq!(interface.retry_count_header, "x-retry-count");
        assert_eq!(interface.with_max_retries(5).max_retries, 5);
    }

    #[test]
    fn test_render_key() {
        let args = InvocationArgs::new()
            .arg("a", 1)
            .arg("b", 2)
            .to_map()
            .unwrap();
        assert_eq!(render_key(&args), "{a=1, b=2}");

        let args = InvocationArgs::new()
            .arg("name", "sku-42")
            .arg("tags", json!(["x"]))
            .to_map()
            .unwrap();
        assert_eq!(render_key(&args), "{name=sku-42, tags=[x]}");

        assert_eq!(render_key(&Map::new()), "{}");
    }

    #[test]
    fn test_render_key_expands_nested_objects() {
        let args = InvocationArgs::new()
            .arg(
                "payload",
                json!({"$add": {"attributes": {"product_id": "ADD:sku-42"}}}),
            )
            .to_map()
            .unwrap();
        assert_eq!(
            render_key(&args),
            "{payload={$add={attributes={product_id=ADD:sku-42}}}}"
        );

        let args = InvocationArgs::new()
            .arg("items", json!([{"id": 1, "ok": true}, null, [1.5, "y"]]))
            .to_map()
            .unwrap();
        assert_eq!(render_key(&args), "{items=[{id=1, ok=true}, null, [1.5, y]]}");
    }

    #[test]
    fn test_find_record_returns_first_record() {
        let first = InboundRecord::new("t", Some("k1"), "v1");
        let second = InboundRecord::new("t", Some("k2"), "v2");
        let args = InvocationArgs::new()
            .arg("flag", true)
            .record("first", &first)
            .record("second", &second);

        assert_eq!(args.to_map().unwrap().len(), 3);
        assert_eq!(args.find_record(), Some(&first));
        assert!(InvocationArgs::new().arg("x", 1).find_record().is_none());
    }

    #[tokio::test]
    async fn test_success_passes_through_without_publishing() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());

        let result: Result<i32, CallError> = interceptor
            .intercept(&api_interface(), InvocationArgs::new().arg("a", 1), || async {
                Ok(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_consumer_failure_publishes_record() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());
        let record = InboundRecord::new("t", Some("k1"), "v");

        let result: Result<(), CallError> = interceptor
            .intercept(
                &consumer_interface(),
                InvocationArgs::new().record("record", &record),
                || async { Err(CallError::Failed("boom".to_string())) },
            )
            .await;

        assert!(is_failed(&result));

        let sent = publisher.messages_to("interface-failure-topic");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key.as_deref(), Some("k1"));

        let body = sent[0].json();
        assert_eq!(body["type"], "CONSUMER");
        assert_eq!(body["resource"], "t");
        assert_eq!(body["interfaceName"], "product-consumer");
        assert_eq!(body["payload"]["key"], "k1");
        assert_eq!(body["payload"]["topic"], "t");
        assert_eq!(body["payload"]["value"], "v");
    }

    #[tokio::test]
    async fn test_consumer_failure_without_key_publishes_null_key() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());
        let record = InboundRecord::new("t", None, "v");

        let _: Result<(), CallError> = interceptor
            .intercept(
                &consumer_interface(),
                InvocationArgs::new().record("record", &record),
                || async { Err(CallError::Failed("boom".to_string())) },
            )
            .await;

        let sent = publisher.messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].key.is_none());
    }

    #[tokio::test]
    async fn test_api_failure_publishes_arguments() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());

        let result: Result<(), CallError> = interceptor
            .intercept(
                &api_interface(),
                InvocationArgs::new().arg("a", 1).arg("b", 2),
                || async { Err(CallError::Failed("boom".to_string())) },
            )
            .await;

        assert!(is_failed(&result));

        let sent = publisher.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key.as_deref(), Some("{a=1, b=2}"));
        assert_eq!(
            sent[0].json(),
            json!({
                "type": "API",
                "resource": "/api/f",
                "interfaceName": "f",
                "payload": {"a": 1, "b": 2}
            })
        );
    }

    #[tokio::test]
    async fn test_consumer_failure_without_record_reports_missing_record() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());

        let result: Result<(), CallError> = interceptor
            .intercept(
                &consumer_interface(),
                InvocationArgs::new().arg("value", "v"),
                || async { Err(CallError::Failed("boom".to_string())) },
            )
            .await;

        assert!(matches!(
            result,
            Err(CallError::Shared(SyncError::MissingRecord { .. }))
        ));
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_replaces_call_error() {
        let publisher = Arc::new(RecordingPublisher::failing("broker 不可达"));
        let interceptor = FailureInterceptor::new(publisher);

        let result: Result<(), CallError> = interceptor
            .intercept(&api_interface(), InvocationArgs::new().arg("a", 1), || async {
                Err(CallError::Failed("boom".to_string()))
            })
            .await;

        assert!(matches!(
            result,
            Err(CallError::Shared(SyncError::DeadLetterPublish { .. }))
        ));
    }

    #[tokio::test]
    async fn test_captured_failure_is_not_published_again() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interceptor = FailureInterceptor::new(publisher.clone());
        let record = InboundRecord::new("t", Some("k1"), "v");
        let inner_interface = api_interface();

        let result: Result<(), CallError> = interceptor
            .intercept(
                &consumer_interface(),
                InvocationArgs::new().record("record", &record),
                || {
                    interceptor.intercept(
                        &inner_interface,
                        InvocationArgs::new().arg("a", 1),
                        || async { Err(CallError::Failed("boom".to_string())) },
                    )
                },
            )
            .await;

        assert!(is_failed(&result));

        let sent = publisher.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].json()["type"], "API");
    }
}
