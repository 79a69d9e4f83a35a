//! 事件结构版本演进（versioning）
//!
//! - `EventUpgrader` / `FnUpgrader`：单步 `v -> v+1` 的载荷升级；
//! - `upgraders`：加字段、改名、拆分合并、嵌套包装等常用原语；
//! - `VersionRegistry`：按事件类型登记版本配置，并在注册时校验升级链；
//! - `migration`：面向历史数据的批量分析与迁移工具。
//!
pub mod migration;
mod registry;
mod upgrader;
pub mod upgraders;

pub use migration::{
    EventMigrator, EventVersionAnalysis, MigrationFailure, MigrationPlan, MigrationResult,
    MigrationStats, TypeMigrationStats, UpgradeStep,
};
pub use registry::{VersionRegistry, VersionedEventConfig};
pub use upgrader::{EventUpgrader, FnUpgrader, JsonObject, SCHEMA_VERSION_FIELD, parse_document};
