use super::{EventFactory, EventSerializer, encode_event, extract_version};
use crate::domain_event::AnyEvent;
use crate::error::{DomainError, DomainResult as Result};
use crate::versioning::{VersionRegistry, VersionedEventConfig};
use std::sync::Arc;

/// 带版本升级的序列化器
///
/// 读取时先取出载荷内嵌的 `schema_version`，低于当前版本则沿升级链逐步升级，
/// 最后以当前版本的解码工厂还原。高于当前版本的载荷（新代码写、旧代码读）
/// 按当前版本尽力解码并记录告警。
#[derive(Debug, Clone, Default)]
pub struct VersionedSerializer {
    registry: Arc<VersionRegistry>,
}

impl VersionedSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<VersionRegistry>) -> Self {
        Self { registry }
    }

    pub fn version_registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// 注册单版本事件
    pub fn register(&self, event_type: impl Into<String>, factory: EventFactory) -> Result<()> {
        self.registry.register_simple_event(event_type, factory)
    }

    pub fn register_versioned(&self, config: VersionedEventConfig) -> Result<()> {
        self.registry.register_versioned_event(config)
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.registry.is_registered(event_type)
    }

    pub fn current_version(&self, event_type: &str) -> Option<u32> {
        self.registry.current_version(event_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.registry.registered_types()
    }

    /// 只升级到 `target_version`，并用该版本的解码工厂还原
    pub fn deserialize_to_version(
        &self,
        event_type: &str,
        data: &[u8],
        target_version: u32,
    ) -> Result<Box<dyn AnyEvent>> {
        let config = self
            .registry
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        let factory = config
            .prototype(target_version)
            .filter(|_| target_version <= config.current_version())
            .ok_or_else(|| DomainError::UnsupportedVersion {
                event_type: event_type.to_string(),
                version: target_version,
            })?;

        let version = extract_version(data);
        if version > target_version {
            return Err(DomainError::CannotDowngrade {
                event_type: event_type.to_string(),
                from_version: version,
                to_version: target_version,
            });
        }

        let (payload, _) =
            self.registry
                .upgrade_payload_to(event_type, data, version, target_version)?;
        factory.decode_bytes(&payload)
    }

    /// 仅升级载荷字节，不做反序列化；已是当前版本时原样返回
    pub fn upgrade_payload_only(&self, event_type: &str, data: &[u8]) -> Result<Vec<u8>> {
        let version = extract_version(data);
        let (payload, _) = self.registry.upgrade_payload(event_type, data, version)?;
        Ok(payload)
    }
}

impl EventSerializer for VersionedSerializer {
    fn serialize(&self, event: &dyn AnyEvent) -> Result<Vec<u8>> {
        encode_event(event)
    }

    fn deserialize(&self, event_type: &str, data: &[u8]) -> Result<Box<dyn AnyEvent>> {
        let config = self
            .registry
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        let current = config.current_version();
        let factory = config
            .prototype(current)
            .ok_or_else(|| DomainError::UnsupportedVersion {
                event_type: event_type.to_string(),
                version: current,
            })?;

        let version = extract_version(data);
        if version > current {
            tracing::warn!(
                event_type,
                payload_version = version,
                current_version = current,
                "payload is newer than the registered schema, decoding with current version"
            );
            return factory.decode_bytes(data);
        }

        let (payload, _) = self.registry.upgrade_payload(event_type, data, version)?;
        factory.decode_bytes(&payload)
    }
}
