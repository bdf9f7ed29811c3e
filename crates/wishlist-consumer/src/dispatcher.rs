//! 消息分发
//!
//! 消费循环收到的每条消息都经由 [`ConsumptionDispatcher::on_message`]
//! 交给注册表中对应的处理器。分发器自身从不提前确认消息。

use std::sync::Arc;

use tracing::{error, info};
use wishlist_shared::kafka::{Acknowledgment, InboundRecord};
use wishlist_shared::observability::metrics::{record_failed, record_received};

use crate::registry::HandlerRegistry;

#[derive(Clone)]
pub struct ConsumptionDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl ConsumptionDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 处理一条消息
    ///
    /// 找不到处理器时记录错误并确认，该消息不会再被投递。
    pub async fn on_message(&self, record: InboundRecord, ack: Acknowledgment) {
        record_received(&record.topic);
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            key = ?record.key,
            value = ?record.value,
            "收到消息"
        );

        match self.registry.resolve(&record.topic) {
            Ok(handler) => handler.process(record, ack).await,
            Err(e) => {
                record_failed(&record.topic, e.reason());
                error!(
                    topic = %record.topic,
                    offset = record.offset,
                    error = %e,
                    "消息无法路由，确认后丢弃"
                );
                ack.acknowledge();
            }
        }
    }
}
