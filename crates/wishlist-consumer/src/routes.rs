//! REST 触发入口
//!
//! `POST /kafka/send` 把请求体原样写入商品心愿单 topic，用于手动触发消费管道。

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wishlist_shared::kafka::MessagePublisher;

/// 触发入口共享状态
#[derive(Clone)]
pub struct TriggerState {
    pub publisher: Arc<dyn MessagePublisher>,
    /// 请求体写入的 topic
    pub topic: String,
}

impl TriggerState {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

pub fn router(state: TriggerState) -> Router {
    Router::new()
        .route("/kafka/send", post(send_message))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn send_message(
    State(state): State<TriggerState>,
    body: String,
) -> Result<String, (StatusCode, String)> {
    match state
        .publisher
        .publish(&state.topic, None, body.as_bytes())
        .await
    {
        Ok((partition, offset)) => {
            info!(topic = %state.topic, partition, offset, "触发消息已写入");
            Ok(format!("Message sent: {body}"))
        }
        Err(e) => {
            error!(topic = %state.topic, error = %e, "触发消息写入失败");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
