//! 领域事件（Domain Event）
//!
//! 定义事件需要实现的最小能力集（`DomainEvent`）、静态描述（`EventSchema`）、
//! 随载荷一同持久化的元数据（`EventMetadata`），以及在总线上传递的
//! 类型擦除形态（`AnyEvent`）。

mod any_event;
mod domain_event_trait;
mod metadata;

pub use any_event::{AnyEvent, SharedEvent};
pub use domain_event_trait::{DomainEvent, EventSchema};
pub use metadata::{DEFAULT_SCHEMA_VERSION, EventMetadata};
