//! 营销平台操作信封
//!
//! 推送给营销平台的数据统一为单键 JSON 对象：
//! `{"$add": {"attributes": {...}}}` 或 `{"$remove": {"attributes": {...}}}`。

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// 保序的属性映射
pub type AttributeMap = Map<String, Value>;

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Remove,
}

impl Operation {
    /// 由原始消息值推断操作：包含子串 "ADD"（区分大小写）即为新增，否则为移除
    pub fn infer(raw: &str) -> Self {
        if raw.contains("ADD") {
            Self::Add
        } else {
            Self::Remove
        }
    }

    /// 信封中的键名
    pub fn envelope_key(&self) -> &'static str {
        match self {
            Self::Add => "$add",
            Self::Remove => "$remove",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
        };
        write!(f, "{s}")
    }
}

/// 一次推送的操作及其属性
#[derive(Debug, Clone, PartialEq)]
pub struct OperationPayload {
    pub operation: Operation,
    pub attributes: AttributeMap,
}

#[derive(Serialize)]
struct AttributesBody<'a> {
    attributes: &'a AttributeMap,
}

impl Serialize for OperationPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            self.operation.envelope_key(),
            &AttributesBody {
                attributes: &self.attributes,
            },
        )?;
        map.end()
    }
}

impl OperationPayload {
    /// 转为 JSON 值，交给营销平台客户端
    pub fn to_value(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "attributes".to_string(),
            Value::Object(self.attributes.clone()),
        );

        let mut envelope = Map::new();
        envelope.insert(
            self.operation.envelope_key().to_string(),
            Value::Object(body),
        );
        Value::Object(envelope)
    }
}

/// 包装属性为操作信封
pub fn build_envelope(operation: Operation, attributes: AttributeMap) -> OperationPayload {
    OperationPayload {
        operation,
        attributes,
    }
}
