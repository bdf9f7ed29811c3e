//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象。
//! 消费端关闭自动提交，每条消息配套一个 [`Acknowledgment`]，
//! 由处理器在完成（或放弃）处理后显式提交偏移量。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::sync::watch::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::SyncError;

// ---------------------------------------------------------------------------
// InboundRecord
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给处理器，也可以原样写入失败负载。
/// `value` 为 `None` 表示墓碑消息（broker 上负载为 null），与空串不同。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl InboundRecord {
    /// 构造一条不带 broker 元数据的消息（分区 0、偏移量 0）
    pub fn new(topic: impl Into<String>, key: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: key.map(String::from),
            value: Some(value.into()),
            timestamp: None,
            headers: BTreeMap::new(),
        }
    }

    /// 构造一条没有负载的墓碑消息
    pub fn tombstone(topic: impl Into<String>, key: Option<&str>) -> Self {
        Self {
            value: None,
            ..Self::new(topic, key, "")
        }
    }

    /// 从 rdkafka 的借用消息构造
    ///
    /// 负载按字符串反序列化器的语义处理：非 UTF-8 字节替换为 U+FFFD 而不报错，
    /// null 负载保留为 `None`。
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg.key().map(|k| String::from_utf8_lossy(k).into_owned());

        let value = msg
            .payload()
            .map(|p| String::from_utf8_lossy(p).into_owned());

        let mut headers = BTreeMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            value,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }
}

// ---------------------------------------------------------------------------
// MessagePublisher
// ---------------------------------------------------------------------------

/// 消息发布抽象
///
/// 失败拦截器和 REST 触发入口只依赖此 trait，测试中可替换为内存实现。
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// 发送原始字节消息，返回 (partition, offset)
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(i32, i64), SyncError>;
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 设为 5 秒，超时即视为投递失败交由调用方处理。
    pub fn new(config: &KafkaConfig) -> Result<Self, SyncError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| SyncError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }
}

#[async_trait]
impl MessagePublisher for KafkaProducer {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(i32, i64), SyncError> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| SyncError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }
}

// ---------------------------------------------------------------------------
// Acknowledgment
// ---------------------------------------------------------------------------

/// 偏移量提交抽象
#[cfg_attr(test, mockall::automock)]
pub trait OffsetCommitter: Send + Sync {
    /// 提交 `offset` 之后的读取位置
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), SyncError>;
}

/// 基于 rdkafka 消费者的偏移量提交器
pub struct KafkaOffsetCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaOffsetCommitter {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }
}

impl OffsetCommitter for KafkaOffsetCommitter {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), SyncError> {
        // Kafka 语义：提交的是下一条待读取消息的位置
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| SyncError::Kafka(format!("构造提交位置失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| SyncError::Kafka(format!("提交偏移量失败: {e}")))
    }
}

/// 单条消息的手动确认句柄
///
/// `acknowledge` 消费 self，同一条消息不可能被确认两次。
/// 未确认就被丢弃时只记录警告，不会提交偏移量。
pub struct Acknowledgment {
    committer: Option<Arc<dyn OffsetCommitter>>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl Acknowledgment {
    pub fn new(committer: Arc<dyn OffsetCommitter>, record: &InboundRecord) -> Self {
        Self {
            committer: Some(committer),
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
        }
    }

    /// 提交该消息的偏移量
    ///
    /// 提交失败只记录日志：消费路径上的调用方不感知任何错误。
    pub fn acknowledge(mut self) {
        let Some(committer) = self.committer.take() else {
            return;
        };

        match committer.commit(&self.topic, self.partition, self.offset) {
            Ok(()) => {
                metrics::counter!("wishlist_offsets_committed_total", "topic" => self.topic.clone())
                    .increment(1);
                debug!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = self.offset,
                    "偏移量已提交"
                );
            }
            Err(e) => {
                error!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = self.offset,
                    error = %e,
                    "提交偏移量失败"
                );
            }
        }
    }
}

impl Drop for Acknowledgment {
    fn drop(&mut self) {
        if self.committer.is_some() {
            warn!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                "消息未确认即被丢弃，偏移量未提交"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// ManualAckConsumer
// ---------------------------------------------------------------------------

/// 手动确认模式的 Kafka 消费者
///
/// 封装 `StreamConsumer`，关闭自动提交，并提供基于 `watch` channel 的优雅关闭语义。
/// 每条消息处理完毕后才拉取下一条，同一分区内不存在并发处理。
pub struct ManualAckConsumer {
    consumer: Arc<StreamConsumer>,
    committer: Arc<dyn OffsetCommitter>,
}

impl ManualAckConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, SyncError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("fetch.wait.max.ms", config.fetch_max_wait_ms.to_string())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .map_err(|e| SyncError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 手动确认消费者已初始化"
        );

        let consumer = Arc::new(consumer);
        let committer = Arc::new(KafkaOffsetCommitter::new(consumer.clone()));
        Ok(Self {
            consumer,
            committer,
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), SyncError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| SyncError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// handler 接收消息和对应的确认句柄，负责在处理结束后确认。
    /// 关闭信号变为 `true` 时退出循环，正在执行的 handler 会先自然完成。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(InboundRecord, Acknowledgment) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if shutdown_requested(changed, &shutdown) {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    // BorrowedMessage 持有消费者内部缓冲区，转换后即释放，不跨越 await
                    let record = match msg_result {
                        Ok(borrowed_msg) => InboundRecord::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let ack = Acknowledgment::new(self.committer.clone(), &record);
                    handler(record, ack).await;
                }
            }
        }
    }
}

/// 关闭信号是否生效
///
/// 发送端被丢弃后 `changed()` 会立即返回错误，此时同样视为关闭，否则循环会空转。
fn shutdown_requested(changed: Result<(), RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    match changed {
        Ok(()) => *shutdown.borrow(),
        Err(_) => {
            warn!("关闭信号发送端已释放");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
