//! 测试工具模块
//!
//! 提供单元测试与集成测试共用的内存替身：记录发送内容的发布器、
//! 记录提交位置的偏移量提交器，以及测试消息构造函数。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::SyncError;
use crate::kafka::{Acknowledgment, InboundRecord, MessagePublisher, OffsetCommitter};

// ==================== 测试消息 ====================

/// 构造带偏移量的测试消息
pub fn test_record(topic: &str, key: Option<&str>, value: &str, offset: i64) -> InboundRecord {
    InboundRecord {
        offset,
        ..InboundRecord::new(topic, key, value)
    }
}

/// 构造带偏移量的墓碑消息（负载为 null）
pub fn test_tombstone(topic: &str, key: Option<&str>, offset: i64) -> InboundRecord {
    InboundRecord {
        offset,
        ..InboundRecord::tombstone(topic, key)
    }
}

/// 构造测试消息及其确认句柄，返回的提交器可用于断言提交次数
pub fn test_delivery(record: &InboundRecord) -> (Acknowledgment, Arc<RecordingCommitter>) {
    let committer = Arc::new(RecordingCommitter::default());
    let ack = Acknowledgment::new(committer.clone(), record);
    (ack, committer)
}

// ==================== 发布器替身 ====================

/// 一条被记录的发送
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// 按 JSON 解析负载
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// 记录所有发送内容的内存发布器
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<PublishedMessage>>,
    failure: Option<String>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次发送都返回 Kafka 错误
    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(reason.to_string()),
        }
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.sent.lock().clone()
    }

    /// 发往指定 topic 的消息
    pub fn messages_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(i32, i64), SyncError> {
        if let Some(reason) = &self.failure {
            return Err(SyncError::Kafka(reason.clone()));
        }

        let mut sent = self.sent.lock();
        sent.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.map(String::from),
            payload: payload.to_vec(),
        });
        Ok((0, sent.len() as i64 - 1))
    }
}

// ==================== 提交器替身 ====================

/// 记录提交位置的偏移量提交器
#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(String, i32, i64)>>,
}

impl RecordingCommitter {
    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.commits.lock().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().len()
    }
}

impl OffsetCommitter for RecordingCommitter {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), SyncError> {
        self.commits
            .lock()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}
