//! 事件子系统（eventing）
//!
//! 提供进程内事件分发与处理的基础抽象：
//! - `EventHandler`：对事件进行消费处理，声明订阅的事件类型；
//! - `HandlerRegistry`：按事件类型/通配维护处理器；
//! - `EventBus`：同步、尽力而为的扇出，隔离处理器错误与 panic；
//! - `EventPublisher`：outbox 处理器依赖的投递端口；
//! - `IdempotentHandler`：基于 `IdempotencyStore` 的重复投递吸收。
//!
pub mod bus;
mod context;
pub mod handler;
pub mod idempotency;
mod registry;

pub use bus::{EventBus, EventPublisher};
pub use context::HandlerContext;
pub use handler::{EventHandler, HandledEventType};
pub use idempotency::{
    DEFAULT_IDEMPOTENCY_TTL, IdempotencyConfig, IdempotencyMetrics, IdempotencyMetricsSnapshot,
    IdempotencyStore, IdempotentHandler, InMemoryIdempotencyStore,
};
pub use registry::HandlerRegistry;
