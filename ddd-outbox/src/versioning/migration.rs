//! 批量迁移工具
//!
//! 面向已落库的历史载荷：统计版本分布、批量升级（可取消）、
//! 在上线前校验升级链并生成迁移计划。
//!
use super::registry::VersionRegistry;
use crate::error::{DomainError, DomainResult as Result};
use crate::serializer::extract_version;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// 单条载荷迁移失败的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub index: usize,
    pub from_version: u32,
    pub reason: String,
}

/// 批量迁移结果
///
/// `payloads` 与输入一一对应：成功的为升级后的字节，失败的保留原始字节。
#[derive(Debug, Clone, Default)]
pub struct MigrationResult {
    pub event_type: String,
    pub total: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub payloads: Vec<Vec<u8>>,
    pub failures: Vec<MigrationFailure>,
    pub duration: Duration,
    /// 被取消时为 `true`，此时 `payloads` 只覆盖前 `total` 条
    pub cancelled: bool,
}

impl MigrationResult {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

/// 载荷版本分布
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventVersionAnalysis {
    pub event_type: String,
    pub current_version: u32,
    pub total: usize,
    pub version_counts: BTreeMap<u32, usize>,
    pub oldest_version: Option<u32>,
    pub newest_version: Option<u32>,
    /// 低于当前版本、需要升级的条数
    pub needs_migration: usize,
    /// 已是（或高于）当前版本的条数
    pub up_to_date: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeStep {
    pub from_version: u32,
    pub to_version: u32,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub event_type: String,
    pub from_version: u32,
    pub to_version: u32,
    pub steps: Vec<UpgradeStep>,
}

impl MigrationPlan {
    /// 每一步都有升级器且首尾相接
    pub fn is_valid(&self) -> bool {
        let mut expected = self.from_version;
        for step in &self.steps {
            if !step.available
                || step.from_version != expected
                || expected.checked_add(1) != Some(step.to_version)
            {
                return false;
            }
            expected = step.to_version;
        }
        expected == self.to_version
    }
}

/// 单个事件类型的迁移统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeMigrationStats {
    pub total_migrated: u64,
    pub total_failed: u64,
    pub average_duration: Duration,
    /// `"v1->v2"` 形式的步骤计数
    pub version_steps: BTreeMap<String, u64>,
}

/// 可在多个迁移任务间共享的统计
#[derive(Debug, Default)]
pub struct MigrationStats {
    by_type: RwLock<HashMap<String, TypeMigrationStats>>,
}

impl MigrationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_migration(
        &self,
        event_type: &str,
        from_version: u32,
        to_version: u32,
        duration: Duration,
        success: bool,
    ) {
        let mut by_type = self.by_type.write().unwrap_or_else(PoisonError::into_inner);
        let stats = by_type.entry(event_type.to_string()).or_default();

        if success {
            stats.total_migrated += 1;
            *stats
                .version_steps
                .entry(format!("v{from_version}->v{to_version}"))
                .or_default() += 1;
        } else {
            stats.total_failed += 1;
        }

        // 滚动平均，覆盖成功与失败的全部尝试
        let attempts = (stats.total_migrated + stats.total_failed) as u32;
        stats.average_duration = if attempts <= 1 {
            duration
        } else {
            (stats.average_duration * (attempts - 1) + duration) / attempts
        };
    }

    pub fn get_stats(&self, event_type: &str) -> Option<TypeMigrationStats> {
        self.by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }

    pub fn all_stats(&self) -> HashMap<String, TypeMigrationStats> {
        self.by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct EventMigrator {
    registry: Arc<VersionRegistry>,
    stats: Option<Arc<MigrationStats>>,
}

impl EventMigrator {
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self {
            registry,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<MigrationStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn current_version(&self, event_type: &str) -> Result<u32> {
        self.registry
            .current_version(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))
    }

    /// 升级单条载荷到当前版本
    pub fn migrate_payload(&self, event_type: &str, data: &[u8]) -> Result<Vec<u8>> {
        let current = self.current_version(event_type)?;
        let from = extract_version(data);
        let started = Instant::now();
        let outcome = self.registry.upgrade_payload(event_type, data, from);

        if let Some(stats) = &self.stats {
            if from < current {
                stats.record_migration(event_type, from, current, started.elapsed(), outcome.is_ok());
            }
        }
        outcome.map(|(payload, _)| payload)
    }

    /// 批量升级；每条之前检查取消信号，被取消时返回已处理部分并置 `cancelled`
    pub fn migrate_payloads(
        &self,
        cancel: &CancellationToken,
        event_type: &str,
        payloads: &[Vec<u8>],
    ) -> Result<MigrationResult> {
        let current = self.current_version(event_type)?;
        let started = Instant::now();
        let mut result = MigrationResult {
            event_type: event_type.to_string(),
            payloads: Vec::with_capacity(payloads.len()),
            ..Default::default()
        };

        for (index, data) in payloads.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(event_type, processed = index, "payload migration cancelled");
                result.cancelled = true;
                break;
            }

            result.total += 1;
            let from_version = extract_version(data);
            match self.migrate_payload(event_type, data) {
                Ok(upgraded) => {
                    if from_version < current {
                        result.migrated += 1;
                    } else {
                        result.skipped += 1;
                    }
                    result.payloads.push(upgraded);
                }
                Err(err) => {
                    tracing::warn!(event_type, index, from_version, error = %err, "payload migration failed");
                    result.failures.push(MigrationFailure {
                        index,
                        from_version,
                        reason: err.to_string(),
                    });
                    result.payloads.push(data.clone());
                }
            }
        }

        result.duration = started.elapsed();
        tracing::info!(
            event_type,
            total = result.total,
            migrated = result.migrated,
            skipped = result.skipped,
            failed = result.failed(),
            cancelled = result.cancelled,
            "payload migration finished"
        );
        Ok(result)
    }

    pub fn analyze_payloads(
        &self,
        event_type: &str,
        payloads: &[Vec<u8>],
    ) -> Result<EventVersionAnalysis> {
        let current = self.current_version(event_type)?;
        let mut version_counts: BTreeMap<u32, usize> = BTreeMap::new();
        for data in payloads {
            *version_counts.entry(extract_version(data)).or_default() += 1;
        }

        let needs_migration: usize = version_counts
            .range(..current)
            .map(|(_, count)| *count)
            .sum();
        Ok(EventVersionAnalysis {
            event_type: event_type.to_string(),
            current_version: current,
            total: payloads.len(),
            oldest_version: version_counts.keys().next().copied(),
            newest_version: version_counts.keys().next_back().copied(),
            version_counts,
            needs_migration,
            up_to_date: payloads.len() - needs_migration,
        })
    }

    /// 上线前检查：`[1, current)` 每个版本都有首尾相接的升级器
    pub fn validate_upgrade_chain(&self, event_type: &str) -> Result<()> {
        let config = self
            .registry
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        let plan = self.create_migration_plan(event_type, 1, config.current_version())?;
        if plan.is_valid() {
            return Ok(());
        }

        let broken = plan
            .steps
            .iter()
            .find(|s| !s.available)
            .map(|s| format!("missing upgrader for version {} -> {}", s.from_version, s.to_version))
            .unwrap_or_else(|| "upgrade steps are not sequential".to_string());
        Err(DomainError::InvalidUpgradeChain {
            event_type: event_type.to_string(),
            reason: broken,
        })
    }

    pub fn create_migration_plan(
        &self,
        event_type: &str,
        from_version: u32,
        to_version: u32,
    ) -> Result<MigrationPlan> {
        let config = self
            .registry
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        if to_version > config.current_version() {
            return Err(DomainError::UnsupportedVersion {
                event_type: event_type.to_string(),
                version: to_version,
            });
        }
        if from_version > to_version {
            return Err(DomainError::CannotDowngrade {
                event_type: event_type.to_string(),
                from_version,
                to_version,
            });
        }

        let steps = (from_version.max(1)..to_version)
            .map(|v| {
                let upgrader = config.upgrader(v);
                UpgradeStep {
                    from_version: v,
                    to_version: upgrader.map_or(v + 1, |u| u.target_version()),
                    available: upgrader.is_some(),
                }
            })
            .collect();
        Ok(MigrationPlan {
            event_type: event_type.to_string(),
            from_version: from_version.max(1),
            to_version,
            steps,
        })
    }

    /// 复制一条载荷到新存储：升级到当前版本并确认可以被当前结构解码
    pub fn copy_payload(&self, event_type: &str, data: &[u8]) -> Result<Vec<u8>> {
        let config = self
            .registry
            .get_config(event_type)
            .ok_or_else(|| DomainError::unknown_event_type(event_type))?;
        let upgraded = self.migrate_payload(event_type, data)?;
        if let Some(factory) = config.prototype(config.current_version()) {
            factory.decode_bytes(&upgraded)?;
        }
        Ok(upgraded)
    }
}
