//! 幂等处理（IdempotentHandler）
//!
//! 用 `IdempotencyStore` 做“检查并标记”，同一处理器对同一事件只执行一次。
//! outbox 是至少一次投递，重复投递在这里被吸收。
//!
use super::context::HandlerContext;
use super::handler::{EventHandler, HandledEventType};
use crate::domain_event::AnyEvent;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认 24 小时，远大于 outbox 的最大重试窗口
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 幂等键存储
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// 原子地检查并标记；返回 `true` 表示此前已标记过（重复）
    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn is_processed(&self, key: &str) -> Result<bool>;

    async fn clear(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T> IdempotencyStore for Arc<T>
where
    T: IdempotencyStore + ?Sized,
{
    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<bool> {
        (**self).mark_processed(key, ttl).await
    }

    async fn is_processed(&self, key: &str) -> Result<bool> {
        (**self).is_processed(key).await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        (**self).clear(key).await
    }
}

/// 内存版幂等存储，过期时间为 `None` 表示永不过期
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    keys: DashMap<String, Option<Instant>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理已过期的键，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.keys.len();
        self.keys.retain(|_, expires_at| !is_expired(*expires_at, now));
        before - self.keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| at <= now)
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl);
        // entry 持有分片写锁，检查与写入之间不会被其他调用方插入
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if is_expired(*occupied.get(), now) {
                    occupied.insert(expires_at);
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expires_at);
                Ok(false)
            }
        }
    }

    async fn is_processed(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .keys
            .get(key)
            .is_some_and(|expires_at| !is_expired(*expires_at, now)))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.keys.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_IDEMPOTENCY_TTL,
        }
    }
}

/// 幂等处理计数，可在多个处理器之间共享
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    processed: AtomicU64,
    duplicate: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdempotencyMetricsSnapshot {
    pub processed: u64,
    pub duplicate: u64,
    pub failed: u64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IdempotencyMetricsSnapshot {
        IdempotencyMetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// 为任意处理器加上幂等保护
///
/// 幂等键为 `{handler_name}:{event_id}`，不同处理器互不影响。
/// 处理失败时不清除幂等键，重试需等待 TTL 过期。
#[derive(Builder)]
pub struct IdempotentHandler {
    inner: Arc<dyn EventHandler>,
    store: Arc<dyn IdempotencyStore>,
    #[builder(default)]
    config: IdempotencyConfig,
    #[builder(default)]
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotentHandler {
    pub fn new(
        inner: Arc<dyn EventHandler>,
        store: Arc<dyn IdempotencyStore>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            inner,
            store,
            config,
            metrics: Arc::default(),
        }
    }

    /// 改用外部共享的计数
    pub fn with_metrics(mut self, metrics: Arc<IdempotencyMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<IdempotencyMetrics> {
        &self.metrics
    }

    pub fn idempotency_key(&self, event: &dyn AnyEvent) -> String {
        format!("{}:{}", self.inner.handler_name(), event.event_id())
    }
}

#[async_trait]
impl EventHandler for IdempotentHandler {
    fn handler_name(&self) -> &str {
        self.inner.handler_name()
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.inner.handled_event_type()
    }

    async fn handle(&self, ctx: &HandlerContext, event: &dyn AnyEvent) -> anyhow::Result<()> {
        if !self.config.enabled {
            return self.inner.handle(ctx, event).await;
        }

        let key = self.idempotency_key(event);
        match self.store.mark_processed(&key, self.config.ttl).await {
            Ok(true) => {
                self.metrics.record_duplicate();
                tracing::debug!(
                    handler = self.handler_name(),
                    event_id = %event.event_id(),
                    "duplicate event skipped"
                );
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(
                    handler = self.handler_name(),
                    event_id = %event.event_id(),
                    error = %err,
                    "idempotency store unavailable, processing anyway"
                );
            }
        }

        match self.inner.handle(ctx, event).await {
            Ok(()) => {
                self.metrics.record_processed();
                Ok(())
            }
            Err(err) => {
                self.metrics.record_failed();
                Err(err)
            }
        }
    }
}
