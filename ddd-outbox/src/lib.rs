//! 事务性发件箱与进程内事件分发（ddd-outbox）
//!
//! 为 DDD 应用提供「业务写入与事件发布同事务」的可靠投递链路：
//! - 领域事件（`domain_event`）：事件元数据、静态描述与类型擦除形态
//! - 序列化（`serializer`）：事件与 outbox 载荷之间的转换，读取时透明升级旧版本
//! - 版本演进（`versioning`）：升级器、升级原语、版本注册表与批量迁移
//! - 发件箱（`outbox`）：记录状态机、仓储端口、事务内写入与后台处理器
//! - 事件分发（`eventing`）：处理器注册表、进程内总线与幂等处理器
//!
//! 本 crate 只依赖仓储与发布端口，内存实现用于测试与单进程场景，
//! Postgres 实现位于 `infra-sqlx` feature 之后。
//!
//! 典型用法：
//! 1. 用 `#[domain_event]` 定义事件，并注册到 `VersionedSerializer`；
//! 2. 在业务事务中调用 `OutboxPublisher::publish_with_tx` 写入 outbox；
//! 3. 以 `EventBus` 作为 `EventPublisher` 构建 `OutboxProcessor` 并 `start`；
//! 4. 需要幂等的消费方用 `IdempotentHandler` 包装后订阅到总线。
//!
pub mod domain_event;
pub mod error;
pub mod eventing;
pub mod outbox;
pub mod serializer;
pub mod versioning;

// 允许在本 crate 内部通过 ::ddd_outbox 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::ddd_outbox 路径。
extern crate self as ddd_outbox;
