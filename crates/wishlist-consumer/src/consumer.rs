//! 心愿单消费者
//!
//! 组合 ManualAckConsumer（消息拉取与手动确认）和 ConsumptionDispatcher（按 topic 分发），
//! 订阅注册表中声明的全部 topic。

use tokio::sync::watch;
use tracing::info;
use wishlist_shared::config::KafkaConfig;
use wishlist_shared::kafka::ManualAckConsumer;

use crate::dispatcher::ConsumptionDispatcher;
use crate::error::WishlistError;

pub struct WishlistConsumer {
    consumer: ManualAckConsumer,
    dispatcher: ConsumptionDispatcher,
}

impl WishlistConsumer {
    pub fn new(
        config: &KafkaConfig,
        dispatcher: ConsumptionDispatcher,
    ) -> Result<Self, WishlistError> {
        let consumer = ManualAckConsumer::new(config)?;
        Ok(Self {
            consumer,
            dispatcher,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), WishlistError> {
        let Self {
            consumer,
            dispatcher,
        } = self;

        let topics = dispatcher.registry().topics();
        consumer.subscribe(&topics)?;
        info!(?topics, "心愿单消费者已启动");

        consumer
            .start(shutdown, |record, ack| {
                let dispatcher = &dispatcher;
                async move { dispatcher.on_message(record, ack).await }
            })
            .await;

        info!("心愿单消费者已停止");
        Ok(())
    }
}
