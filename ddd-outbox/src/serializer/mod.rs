//! 事件序列化（serializer）
//!
//! - `EventSerializer`：事件与 outbox 载荷字节之间的转换协议；
//! - `EventFactory`：事件类型字符串到具体结构体的显式解码工厂；
//! - `JsonEventSerializer`：不做版本升级的 JSON 实现；
//! - `VersionedSerializer`：读取时按 `schema_version` 透明升级旧载荷。
//!
mod json;
mod versioned;

pub use json::JsonEventSerializer;
pub use versioned::VersionedSerializer;

use crate::domain_event::{AnyEvent, DEFAULT_SCHEMA_VERSION, DomainEvent};
use crate::error::{DomainError, DomainResult as Result};
use crate::versioning::SCHEMA_VERSION_FIELD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub trait EventSerializer: Send + Sync {
    fn serialize(&self, event: &dyn AnyEvent) -> Result<Vec<u8>>;

    fn deserialize(&self, event_type: &str, data: &[u8]) -> Result<Box<dyn AnyEvent>>;
}

impl<T> EventSerializer for Arc<T>
where
    T: EventSerializer + ?Sized,
{
    fn serialize(&self, event: &dyn AnyEvent) -> Result<Vec<u8>> {
        (**self).serialize(event)
    }

    fn deserialize(&self, event_type: &str, data: &[u8]) -> Result<Box<dyn AnyEvent>> {
        (**self).deserialize(event_type, data)
    }
}

type DecodeFn = dyn Fn(Value) -> Result<Box<dyn AnyEvent>> + Send + Sync;

/// 解码工厂：把 JSON 文档还原为某个具体事件类型
#[derive(Clone)]
pub struct EventFactory {
    type_name: &'static str,
    decode: Arc<DecodeFn>,
}

impl EventFactory {
    pub fn of<T>() -> Self
    where
        T: DomainEvent + Serialize + DeserializeOwned,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            decode: Arc::new(|value: Value| -> Result<Box<dyn AnyEvent>> {
                let event: T = serde_json::from_value(value)?;
                Ok(Box::new(event))
            }),
        }
    }

    pub fn from_fn<F>(type_name: &'static str, decode: F) -> Self
    where
        F: Fn(Value) -> Result<Box<dyn AnyEvent>> + Send + Sync + 'static,
    {
        Self {
            type_name,
            decode: Arc::new(decode),
        }
    }

    /// 目标结构体名称，仅用于诊断
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn decode(&self, value: Value) -> Result<Box<dyn AnyEvent>> {
        (self.decode)(value)
    }

    pub fn decode_bytes(&self, data: &[u8]) -> Result<Box<dyn AnyEvent>> {
        self.decode(serde_json::from_slice(data)?)
    }
}

impl fmt::Debug for EventFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventFactory").field(&self.type_name).finish()
    }
}

/// 读取载荷中的 `schema_version`；缺失、非正数或无法解析时视为 1
pub fn extract_version(data: &[u8]) -> u32 {
    #[derive(serde::Deserialize)]
    struct VersionProbe {
        schema_version: Option<i64>,
    }

    serde_json::from_slice::<VersionProbe>(data)
        .ok()
        .and_then(|probe| probe.schema_version)
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(DEFAULT_SCHEMA_VERSION)
}

/// 序列化事件并保证载荷带有 `schema_version`
pub(crate) fn encode_event(event: &dyn AnyEvent) -> Result<Vec<u8>> {
    let mut value = event.to_json()?;
    match value.as_object_mut() {
        Some(object) => {
            object
                .entry(SCHEMA_VERSION_FIELD)
                .or_insert_with(|| Value::from(event.schema_version()));
        }
        None => {
            return Err(DomainError::Parse {
                reason: format!("event {} must serialize to a JSON object", event.event_type()),
            });
        }
    }
    Ok(serde_json::to_vec(&value)?)
}
