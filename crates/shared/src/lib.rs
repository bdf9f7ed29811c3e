//! 共享库
//!
//! 包含消费管道共用的配置、错误处理、Kafka 手动确认消费、失败捕获与可观测性等基础设施代码。

pub mod config;
pub mod dlq;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod retryable;
pub mod test_utils;
