use super::{EventFactory, EventSerializer, encode_event};
use crate::domain_event::{AnyEvent, EventSchema};
use crate::error::{DomainError, DomainResult as Result};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// 纯 JSON 序列化器：按事件类型查找解码工厂，不处理版本升级
#[derive(Debug, Default)]
pub struct JsonEventSerializer {
    factories: RwLock<HashMap<String, EventFactory>>,
}

impl JsonEventSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: impl Into<String>, factory: EventFactory) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_type.into(), factory);
    }

    pub fn register_event<T: EventSchema>(&self) {
        self.register(T::EVENT_TYPE, EventFactory::of::<T>());
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event_type)
    }

    fn factory(&self, event_type: &str) -> Result<EventFactory> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .ok_or_else(|| DomainError::unknown_event_type(event_type))
    }
}

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &dyn AnyEvent) -> Result<Vec<u8>> {
        encode_event(event)
    }

    fn deserialize(&self, event_type: &str, data: &[u8]) -> Result<Box<dyn AnyEvent>> {
        self.factory(event_type)?.decode_bytes(data)
    }
}
