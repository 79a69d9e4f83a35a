use super::domain_event_trait::DomainEvent;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// 类型擦除后的事件：可向下转型，可序列化为 JSON 文档
///
/// 对所有 `DomainEvent + Serialize` 类型自动实现，总线与处理器之间以
/// `&dyn AnyEvent` / [`SharedEvent`] 传递。
pub trait AnyEvent: DomainEvent {
    fn as_any(&self) -> &dyn Any;

    fn to_json(&self) -> serde_json::Result<Value>;
}

impl<T> AnyEvent for T
where
    T: DomainEvent + Serialize,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl<'a> dyn AnyEvent + 'a {
    pub fn is<T: AnyEvent>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: AnyEvent>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// 可跨任务共享的事件
pub type SharedEvent = Arc<dyn AnyEvent>;
