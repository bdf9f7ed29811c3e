//! 统一错误处理模块
//!
//! 定义消费管道各组件共享的基础设施错误，使用 thiserror 提供良好的错误信息。
//! 业务相关的错误（路由失败、转换失败、下游调用失败）由服务 crate 自行定义，
//! 并通过 `#[from]` 透传本类型。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SyncError {
    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 序列化错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 失败捕获错误 ====================
    /// 写入失败 topic 本身失败，不再二次投递
    #[error("失败消息投递失败: topic={topic}, 原因={message}")]
    DeadLetterPublish { topic: String, message: String },

    /// CONSUMER 类型接口的调用参数中没有消息记录，无法构造失败负载
    #[error("调用参数中未找到消息记录: interface={interface_name}")]
    MissingRecord { interface_name: String },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::DeadLetterPublish { .. } => "DEAD_LETTER_PUBLISH_FAILED",
            Self::MissingRecord { .. } => "MISSING_RECORD",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
