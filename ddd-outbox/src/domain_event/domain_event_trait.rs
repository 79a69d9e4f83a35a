use super::metadata::EventMetadata;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use uuid::Uuid;

/// 领域事件需要满足的能力边界
///
/// 仅要求提供 [`EventMetadata`]，其余访问器默认从元数据读取；
/// 需要自定义来源时可逐个覆写。
pub trait DomainEvent: fmt::Debug + Send + Sync + 'static {
    fn metadata(&self) -> &EventMetadata;

    /// 事件唯一标识（亦作为幂等键）
    fn event_id(&self) -> Uuid {
        self.metadata().event_id()
    }

    /// 事件类型（形如 `SalesOrderCreated`）
    fn event_type(&self) -> &str {
        self.metadata().event_type()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata().occurred_at()
    }

    fn aggregate_id(&self) -> Uuid {
        self.metadata().aggregate_id()
    }

    fn aggregate_type(&self) -> &str {
        self.metadata().aggregate_type()
    }

    fn tenant_id(&self) -> Uuid {
        self.metadata().tenant_id()
    }

    /// 载荷结构版本，缺省为 1
    fn schema_version(&self) -> u32 {
        self.metadata().schema_version()
    }
}

/// 事件的静态描述：类型名与当前结构版本
///
/// 通常由 `#[domain_event]` 宏生成。
pub trait EventSchema: DomainEvent + Serialize + DeserializeOwned {
    const EVENT_TYPE: &'static str;
    const SCHEMA_VERSION: u32 = 1;

    /// 生成一份与本事件类型/版本匹配的新元数据
    fn new_metadata(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        tenant_id: Uuid,
    ) -> EventMetadata {
        EventMetadata::builder()
            .event_type(Self::EVENT_TYPE)
            .aggregate_type(aggregate_type)
            .aggregate_id(aggregate_id)
            .tenant_id(tenant_id)
            .schema_version(Self::SCHEMA_VERSION)
            .build()
    }
}
