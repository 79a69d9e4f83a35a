//! 事件版本注册表（VersionRegistry）
//!
//! 每个事件类型登记：当前版本、各版本的解码工厂、以及 `v -> v+1` 的升级链。
//! 升级链在注册时即校验完整性与连续性，运行期不会遇到缺口。
//!
use super::upgrader::EventUpgrader;
use crate::error::{DomainError, DomainResult as Result};
use crate::serializer::EventFactory;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// 单个事件类型的版本配置
///
/// ```
/// use ddd_outbox::serializer::EventFactory;
/// use ddd_outbox::versioning::{FnUpgrader, VersionedEventConfig, upgraders};
/// # use ddd_outbox::domain_event::{DomainEvent, EventMetadata};
/// # #[derive(Debug, serde::Serialize, serde::Deserialize)]
/// # struct OrderPaidV2 { #[serde(flatten)] metadata: EventMetadata, amount: i64, currency: String }
/// # impl DomainEvent for OrderPaidV2 { fn metadata(&self) -> &EventMetadata { &self.metadata } }
///
/// let config = VersionedEventConfig::new("OrderPaid", 2)
///     .with_prototype(2, EventFactory::of::<OrderPaidV2>())
///     .with_upgrader(FnUpgrader::new(1, 2, upgraders::add_field("currency", "CNY".into())));
/// assert_eq!(config.current_version(), 2);
/// ```
#[derive(Clone)]
pub struct VersionedEventConfig {
    event_type: String,
    current_version: u32,
    prototypes: BTreeMap<u32, EventFactory>,
    upgraders: Vec<Arc<dyn EventUpgrader>>,
}

impl VersionedEventConfig {
    pub fn new(event_type: impl Into<String>, current_version: u32) -> Self {
        Self {
            event_type: event_type.into(),
            current_version,
            prototypes: BTreeMap::new(),
            upgraders: Vec::new(),
        }
    }

    /// 只有一个版本、没有升级链的事件
    pub fn simple(event_type: impl Into<String>, factory: EventFactory) -> Self {
        Self::new(event_type, 1).with_prototype(1, factory)
    }

    pub fn with_prototype(mut self, version: u32, factory: EventFactory) -> Self {
        self.prototypes.insert(version, factory);
        self
    }

    pub fn with_upgrader(mut self, upgrader: impl EventUpgrader + 'static) -> Self {
        self.upgraders.push(Arc::new(upgrader));
        self
    }

    pub fn with_shared_upgrader(mut self, upgrader: Arc<dyn EventUpgrader>) -> Self {
        self.upgraders.push(upgrader);
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn prototype(&self, version: u32) -> Option<&EventFactory> {
        self.prototypes.get(&version)
    }

    /// 已登记解码工厂的版本，升序
    pub fn versions(&self) -> Vec<u32> {
        self.prototypes.keys().copied().collect()
    }

    /// 以 `source_version` 为起点的升级器
    pub fn upgrader(&self, source_version: u32) -> Option<&Arc<dyn EventUpgrader>> {
        self.upgraders
            .iter()
            .find(|u| u.source_version() == source_version)
    }

    pub fn upgraders(&self) -> &[Arc<dyn EventUpgrader>] {
        &self.upgraders
    }

    /// 校验升级链：逐步相连、无重复、覆盖 `[1, current)`，且当前版本有解码工厂
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| DomainError::InvalidUpgradeChain {
            event_type: self.event_type.clone(),
            reason,
        };

        if self.current_version == 0 {
            return Err(invalid("current version must be at least 1".to_string()));
        }

        let mut seen = BTreeSet::new();
        for upgrader in &self.upgraders {
            let (source, target) = (upgrader.source_version(), upgrader.target_version());
            if source == 0 || source.checked_add(1) != Some(target) {
                return Err(invalid(format!(
                    "upgrader must be sequential: {source} -> {target}"
                )));
            }
            if source >= self.current_version {
                return Err(invalid(format!(
                    "upgrader {source} -> {target} exceeds current version {}",
                    self.current_version
                )));
            }
            if !seen.insert(source) {
                return Err(invalid(format!(
                    "duplicate upgrader for version {source} -> {target}"
                )));
            }
        }

        for version in 1..self.current_version {
            if !seen.contains(&version) {
                return Err(invalid(format!(
                    "missing upgrader for version {version} -> {}",
                    version + 1
                )));
            }
        }

        if !self.prototypes.contains_key(&self.current_version) {
            return Err(invalid(format!(
                "missing prototype for current version {}",
                self.current_version
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for VersionedEventConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self
            .upgraders
            .iter()
            .map(|u| format!("{}->{}", u.source_version(), u.target_version()))
            .collect();
        f.debug_struct("VersionedEventConfig")
            .field("event_type", &self.event_type)
            .field("current_version", &self.current_version)
            .field("prototypes", &self.prototypes)
            .field("upgraders", &steps)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct VersionRegistry {
    configs: RwLock<HashMap<String, Arc<VersionedEventConfig>>>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或替换）一个带版本的事件类型，升级链不完整时拒绝
    pub fn register_versioned_event(&self, mut config: VersionedEventConfig) -> Result<()> {
        config.validate()?;
        config.upgraders.sort_by_key(|u| u.source_version());

        tracing::debug!(
            event_type = %config.event_type,
            current_version = config.current_version,
            "registered versioned event"
        );
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.event_type.clone(), Arc::new(config));
        Ok(())
    }

    pub fn register_simple_event(
        &self,
        event_type: impl Into<String>,
        factory: EventFactory,
    ) -> Result<()> {
        self.register_versioned_event(VersionedEventConfig::simple(event_type, factory))
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event_type)
    }

    pub fn get_config(&self, event_type: &str) -> Option<Arc<VersionedEventConfig>> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }

    pub fn current_version(&self, event_type: &str) -> Option<u32> {
        self.get_config(event_type).map(|c| c.current_version)
    }

    /// 已注册的事件类型，按字典序
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// 把载荷从 `from_version` 升级到当前版本，返回升级后的字节与版本
    ///
    /// 已是当前（或更新）版本时原样返回。
    pub fn upgrade_payload(
        &self,
        event_type: &str,
        data: &[u8],
        from_version: u32,
    ) -> Result<(Vec<u8>, u32)> {
        let config = self
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        upgrade_to(&config, data, from_version, config.current_version)
    }

    /// 升级到指定版本（不超过当前版本）
    pub fn upgrade_payload_to(
        &self,
        event_type: &str,
        data: &[u8],
        from_version: u32,
        target_version: u32,
    ) -> Result<(Vec<u8>, u32)> {
        let config = self
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        if target_version > config.current_version {
            return Err(DomainError::UnsupportedVersion {
                event_type: event_type.to_string(),
                version: target_version,
            });
        }
        upgrade_to(&config, data, from_version, target_version)
    }
}

fn upgrade_to(
    config: &VersionedEventConfig,
    data: &[u8],
    from_version: u32,
    target_version: u32,
) -> Result<(Vec<u8>, u32)> {
    let mut version = from_version.max(1);
    if version >= target_version {
        return Ok((data.to_vec(), version));
    }

    let mut payload = data.to_vec();
    while version < target_version {
        let upgrader = config
            .upgrader(version)
            .ok_or_else(|| DomainError::UpgradeFailed {
                event_type: config.event_type.clone(),
                from_version: version,
                reason: format!("no upgrader registered for version {version}"),
            })?;
        payload = upgrader
            .upgrade(&payload)
            .map_err(|e| DomainError::UpgradeFailed {
                event_type: config.event_type.clone(),
                from_version: version,
                reason: e.to_string(),
            })?;
        tracing::debug!(
            event_type = %config.event_type,
            from_version = version,
            to_version = upgrader.target_version(),
            "upgraded event payload"
        );
        version = upgrader.target_version();
    }
    Ok((payload, version))
}
