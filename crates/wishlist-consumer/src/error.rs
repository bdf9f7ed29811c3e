//! 心愿单服务专用错误类型
//!
//! 在共享库 SyncError 基础上定义本服务特有的错误变体，
//! 使处理器层可以区分路由、转换与下游调用等不同失败原因。

use wishlist_shared::error::SyncError;
use wishlist_shared::retryable::CapturedFailure;

/// 心愿单处理错误
#[derive(Debug, thiserror::Error)]
pub enum WishlistError {
    /// 没有处理器声明该 topic，消息被确认后丢弃
    #[error("未找到 topic 对应的处理器: {topic}")]
    NoHandlerFound { topic: String },

    /// 启动时两个处理器声明了同一个 topic
    #[error("topic 已被其他处理器声明: {topic}")]
    DuplicateHandler { topic: String },

    /// 消息没有 value（墓碑消息），无从推断操作
    #[error("消息没有 value: topic={topic}, offset={offset}")]
    Tombstone { topic: String, offset: i64 },

    #[error("属性转换失败: {0}")]
    Transform(String),

    /// 营销平台返回非 2xx 或请求未能送达
    #[error("营销平台调用失败: status={status:?}, {message}")]
    DownstreamSend {
        status: Option<u16>,
        message: String,
    },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] SyncError),

    /// 已写入失败 topic 的错误，外层拦截器不再重复记录
    #[error(transparent)]
    Captured(Box<WishlistError>),
}

impl WishlistError {
    /// 用作失败指标的 reason 标签
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoHandlerFound { .. } => "NO_HANDLER_FOUND",
            Self::DuplicateHandler { .. } => "DUPLICATE_HANDLER",
            Self::Tombstone { .. } => "TOMBSTONE",
            Self::Transform(_) => "TRANSFORM",
            Self::DownstreamSend { .. } => "DOWNSTREAM_SEND",
            Self::Shared(e) => e.code(),
            Self::Captured(inner) => inner.reason(),
        }
    }
}

impl CapturedFailure for WishlistError {
    fn is_captured(&self) -> bool {
        matches!(self, Self::Captured(_))
    }

    fn into_captured(self) -> Self {
        match self {
            Self::Captured(_) => self,
            other => Self::Captured(Box::new(other)),
        }
    }
}
