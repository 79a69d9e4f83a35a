use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 未携带 `schema_version` 的载荷一律视为 v1
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

/// 事件元数据
///
/// 以 `#[serde(flatten)]` 嵌入具体事件结构体，序列化后的字段名与
/// `outbox_events.payload` 中的 JSON 保持一致：
/// `id`、`type`、`timestamp`、`aggregate_id`、`aggregate_type`、`tenant_id`、`schema_version`。
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[builder(default = Uuid::new_v4())]
    #[serde(rename = "id")]
    event_id: Uuid,
    #[builder(into)]
    #[serde(rename = "type")]
    event_type: String,
    #[builder(default = Utc::now())]
    #[serde(rename = "timestamp")]
    occurred_at: DateTime<Utc>,
    aggregate_id: Uuid,
    #[builder(into)]
    aggregate_type: String,
    tenant_id: Uuid,
    #[builder(default = DEFAULT_SCHEMA_VERSION)]
    #[serde(default = "default_schema_version")]
    schema_version: u32,
}

impl EventMetadata {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }
}
