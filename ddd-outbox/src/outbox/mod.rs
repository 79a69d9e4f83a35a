//! 事务性发件箱（Transactional Outbox）
//!
//! 领域事件与业务数据在同一事务内写入 outbox 表，再由后台处理器异步投递：
//! - `OutboxEntry`：一条待投递记录及其状态机（Pending/Processing/Sent/Failed/Dead）；
//! - `OutboxRepository`：持久化端口，`save_in` 参与调用方事务；
//! - `OutboxPublisher`：在调用方事务中把事件写成 outbox 记录；
//! - `OutboxProcessor`：周期认领、投递、重试与清理。
//!
mod entry;
mod in_memory;
#[cfg(feature = "infra-sqlx")]
mod postgres;
mod processor;
mod publisher;
mod repository;

pub use entry::{BASE_BACKOFF, DEFAULT_MAX_RETRIES, OutboxEntry, OutboxStatus, backoff_delay};
pub use in_memory::{InMemoryOutboxRepository, InMemoryUnitOfWork};
#[cfg(feature = "infra-sqlx")]
pub use postgres::PgOutboxRepository;
pub use processor::{BatchReport, OutboxProcessor, OutboxProcessorConfig, ProcessorHandle};
pub use publisher::OutboxPublisher;
pub use repository::{OutboxRepository, OutboxUnitOfWork, Page, PageRequest};
