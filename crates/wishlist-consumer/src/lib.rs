//! 心愿单消费服务
//!
//! 从按业务划分的 Kafka topic 手动确认消费消息，按 topic 路由到对应的处理器，
//! 将原始值转换为 ADD/REMOVE 操作信封推送到营销平台。
//! 处理失败的消息和下游调用会写入失败 topic，消息本身仍被确认。

pub mod client;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod payload;
pub mod registry;
pub mod routes;
pub mod transformer;
