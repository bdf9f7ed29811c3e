//! 原始消息值到属性映射的转换
//!
//! 每个业务处理器对应一个 [`AttributeTransformer`] 实现，
//! 处理器模板负责推断操作、包装信封和推送，转换器只负责业务字段映射。

use serde_json::Value;

use crate::error::WishlistError;
use crate::payload::AttributeMap;

/// 属性转换器
///
/// 转换必须是纯函数：同一输入总是得到相同的属性映射。
pub trait AttributeTransformer: Send + Sync {
    fn transform(&self, raw: &str) -> Result<AttributeMap, WishlistError>;
}

/// 商品心愿单转换：`{"product_id": <原始值>}`
///
/// 任何字符串都原样映射，空串同样如此。
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductAttributes;

impl AttributeTransformer for ProductAttributes {
    fn transform(&self, raw: &str) -> Result<AttributeMap, WishlistError> {
        let mut attributes = AttributeMap::new();
        attributes.insert("product_id".to_string(), Value::String(raw.to_string()));
        Ok(attributes)
    }
}
