//! 接口失败记录
//!
//! 被失败拦截器包装的调用出错时，错误现场被整理为 [`FailurePayload`]
//! 写入该调用点配置的失败 topic。每次失败只投递一次，不保存历史。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;
use crate::kafka::{InboundRecord, MessagePublisher};

// ---------------------------------------------------------------------------
// FailureType
// ---------------------------------------------------------------------------

/// 失败接口类型
///
/// 决定失败负载中 payload 字段的形态：CONSUMER 记录原始消息，API 记录调用参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Api,
    Consumer,
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Api => "API",
            Self::Consumer => "CONSUMER",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// FailurePayload
// ---------------------------------------------------------------------------

/// 失败记录信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePayload {
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    pub resource: String,
    pub interface_name: String,
    /// CONSUMER：出错的原始消息；API：按参数声明顺序排列的 名称→参数值 映射
    pub payload: serde_json::Value,
}

impl FailurePayload {
    /// 消费接口失败，payload 为原始消息
    pub fn consumer(
        resource: impl Into<String>,
        interface_name: impl Into<String>,
        record: &InboundRecord,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            failure_type: FailureType::Consumer,
            resource: resource.into(),
            interface_name: interface_name.into(),
            payload: serde_json::to_value(record)?,
        })
    }

    /// API 调用失败，payload 为调用参数
    pub fn api(
        resource: impl Into<String>,
        interface_name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            failure_type: FailureType::Api,
            resource: resource.into(),
            interface_name: interface_name.into(),
            payload: serde_json::Value::Object(arguments),
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer
// ---------------------------------------------------------------------------

/// 失败记录生产者
///
/// 投递失败直接向上返回 `DeadLetterPublish`，不做重试，也不再写入其他 topic。
#[derive(Clone)]
pub struct DlqProducer {
    publisher: Arc<dyn MessagePublisher>,
}

impl DlqProducer {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }

    /// 将失败记录写入指定的失败 topic
    ///
    /// `key` 为 `None` 时消息不带 key，由分区器分散到各分区。
    pub async fn send_to_dlq(
        &self,
        failure_topic: &str,
        key: Option<&str>,
        failure: &FailurePayload,
    ) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec(failure).map_err(|e| SyncError::DeadLetterPublish {
            topic: failure_topic.to_string(),
            message: format!("序列化失败: {e}"),
        })?;

        self.publisher
            .publish(failure_topic, key, &bytes)
            .await
            .map_err(|e| SyncError::DeadLetterPublish {
                topic: failure_topic.to_string(),
                message: e.to_string(),
            })?;

        metrics::counter!(
            "wishlist_dead_letters_published_total",
            "type" => failure.failure_type.to_string()
        )
        .increment(1);

        warn!(
            failure_topic,
            key = ?key,
            failure_type = %failure.failure_type,
            interface_name = %failure.interface_name,
            resource = %failure.resource,
            "失败记录已写入失败 topic"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
