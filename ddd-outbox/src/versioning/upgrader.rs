//! 单步载荷升级器（EventUpgrader）
//!
//! 每个升级器只负责 `v -> v+1` 一步，操作对象是无类型的 JSON 文档，
//! 与最终反序列化到哪个具体结构体无关。
//!
use crate::error::{DomainError, DomainResult as Result};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// 载荷中记录结构版本的字段名
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

/// 升级器操作的通用文档形态
pub type JsonObject = Map<String, Value>;

pub trait EventUpgrader: Send + Sync {
    fn source_version(&self) -> u32;

    fn target_version(&self) -> u32;

    fn upgrade_document(&self, document: JsonObject) -> Result<JsonObject>;

    /// 升级原始字节，并把 `schema_version` 写为目标版本
    fn upgrade(&self, data: &[u8]) -> Result<Vec<u8>> {
        let document = parse_document(data)?;
        let mut upgraded = self.upgrade_document(document)?;
        upgraded.insert(
            SCHEMA_VERSION_FIELD.to_string(),
            Value::from(self.target_version()),
        );
        Ok(serde_json::to_vec(&upgraded)?)
    }
}

impl<T> EventUpgrader for Arc<T>
where
    T: EventUpgrader + ?Sized,
{
    fn source_version(&self) -> u32 {
        (**self).source_version()
    }

    fn target_version(&self) -> u32 {
        (**self).target_version()
    }

    fn upgrade_document(&self, document: JsonObject) -> Result<JsonObject> {
        (**self).upgrade_document(document)
    }

    fn upgrade(&self, data: &[u8]) -> Result<Vec<u8>> {
        (**self).upgrade(data)
    }
}

/// 解析为 JSON 对象；数组、标量等一律视为格式错误
pub fn parse_document(data: &[u8]) -> Result<JsonObject> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Object(map) => Ok(map),
        other => Err(DomainError::Parse {
            reason: format!("event payload must be a JSON object, got {}", kind_of(&other)),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 以闭包实现的升级器
///
/// ```
/// use ddd_outbox::versioning::{EventUpgrader, FnUpgrader, upgraders};
///
/// let up = FnUpgrader::new(1, 2, upgraders::add_field("currency", "CNY".into()));
/// let out = up.upgrade(br#"{"amount":10}"#).unwrap();
/// let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
/// assert_eq!(doc["currency"], "CNY");
/// assert_eq!(doc["schema_version"], 2);
/// ```
pub struct FnUpgrader<F> {
    source: u32,
    target: u32,
    transform: F,
}

impl<F> FnUpgrader<F>
where
    F: Fn(JsonObject) -> Result<JsonObject> + Send + Sync,
{
    pub fn new(source: u32, target: u32, transform: F) -> Self {
        Self {
            source,
            target,
            transform,
        }
    }
}

impl<F> fmt::Debug for FnUpgrader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUpgrader")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl<F> EventUpgrader for FnUpgrader<F>
where
    F: Fn(JsonObject) -> Result<JsonObject> + Send + Sync,
{
    fn source_version(&self) -> u32 {
        self.source
    }

    fn target_version(&self) -> u32 {
        self.target
    }

    fn upgrade_document(&self, document: JsonObject) -> Result<JsonObject> {
        (self.transform)(document)
    }
}
