//! 处理器注册表
//!
//! 启动时一次性注册全部处理器，之后只读。按 topic 查找处理器，
//! 一个 topic 只能由一个处理器声明。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::error::WishlistError;
use crate::handler::RecordHandler;

pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn RecordHandler>>,
}

impl HandlerRegistry {
    /// 注册处理器，两个处理器声明同一 topic 时返回 `DuplicateHandler`
    pub fn new(handlers: Vec<Arc<dyn RecordHandler>>) -> Result<Self, WishlistError> {
        let mut seen = HashSet::new();
        for handler in &handlers {
            if !seen.insert(handler.topic().to_string()) {
                return Err(WishlistError::DuplicateHandler {
                    topic: handler.topic().to_string(),
                });
            }
        }

        info!(topics = ?seen, "处理器注册完成");
        Ok(Self { handlers })
    }

    /// 按注册顺序找到第一个支持该 topic 的处理器
    pub fn resolve(&self, topic: &str) -> Result<Arc<dyn RecordHandler>, WishlistError> {
        self.handlers
            .iter()
            .find(|h| h.supports(topic))
            .cloned()
            .ok_or_else(|| WishlistError::NoHandlerFound {
                topic: topic.to_string(),
            })
    }

    /// 已声明的 topic 列表，用于订阅
    pub fn topics(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.topic()).collect()
    }
}
