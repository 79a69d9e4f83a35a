//! Outbox 处理器（OutboxProcessor）
//!
//! 两个长驻周期任务，一起启动、一起停止：
//! - 投递：认领 `Pending` 与到期的 `Failed` 记录，反序列化（透明升级）后交给
//!   `EventPublisher`，按结果标记 `Sent` 或 `Failed`/`Dead`；
//! - 清理（可关闭）：删除超过保留期的 `Sent` 记录。
//!
//! 每轮投递前先回收滞留在 `Processing` 超过 `stuck_timeout` 的记录（进程在认领后
//! 崩溃，或结果回写失败），按一次失败处理，之后照常走重试退避。
//!
//! 单条记录回写失败只影响该条，同批其余记录继续处理。
//!
//! 关闭时先发出取消信号，正在处理的批次会完整跑完，不会中途打断。
//!
use super::entry::{OutboxEntry, OutboxStatus};
use super::repository::OutboxRepository;
use crate::domain_event::SharedEvent;
use crate::error::{DomainError, DomainResult as Result};
use crate::eventing::{EventPublisher, HandlerContext};
use crate::serializer::EventSerializer;
use bon::Builder;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 处理器配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutboxProcessorConfig {
    /// 每轮认领的 `Pending` 上限（到期重试记录另计同样上限）
    pub batch_size: usize,
    /// 投递轮询间隔
    pub poll_interval: Duration,
    pub cleanup_enabled: bool,
    /// `Sent` 记录的保留时长
    pub cleanup_retention: Duration,
    pub cleanup_interval: Duration,
    /// `Processing` 超过该时长视为认领失效，需大于单批最长处理时间
    pub stuck_timeout: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            cleanup_enabled: true,
            cleanup_retention: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            stuck_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// 单轮处理结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub dead: usize,
    /// 结果回写失败的条数；这些记录留在 `Processing`，由滞留回收兜底
    pub errors: usize,
}

#[derive(Builder)]
pub struct OutboxProcessor {
    repository: Arc<dyn OutboxRepository>,
    serializer: Arc<dyn EventSerializer>,
    publisher: Arc<dyn EventPublisher>,
    #[builder(default)]
    config: OutboxProcessorConfig,
}

impl OutboxProcessor {
    /// 启动投递与清理任务，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> ProcessorHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        // process worker（周期任务）
        {
            let processor = self.clone();
            let ctx = HandlerContext::new(token.clone());
            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.poll_interval,
                move || {
                    let processor = processor.clone();
                    let ctx = ctx.clone();
                    async move {
                        if let Err(err) = processor.reclaim_stuck().await {
                            tracing::error!(error = %err, "outbox stuck reclaim failed");
                        }
                        match processor.process_batch(&ctx).await {
                            Ok(report) if report.claimed > 0 => {
                                tracing::info!(
                                    claimed = report.claimed,
                                    sent = report.sent,
                                    failed = report.failed,
                                    dead = report.dead,
                                    errors = report.errors,
                                    "outbox batch processed"
                                );
                            }
                            Ok(_) => {}
                            Err(err) => {
                                tracing::error!(error = %err, "outbox batch aborted");
                            }
                        }
                    }
                },
            ));
        }

        // cleanup worker（周期任务）
        if self.config.cleanup_enabled {
            let processor = self.clone();
            tasks.push(Self::spawn_periodic(
                token.clone(),
                self.config.cleanup_interval,
                move || {
                    let processor = processor.clone();
                    async move {
                        if let Err(err) = processor.cleanup().await {
                            tracing::error!(error = %err, "outbox cleanup failed");
                        }
                    }
                },
            ));
        }

        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            cleanup_enabled = self.config.cleanup_enabled,
            "outbox processor started"
        );
        ProcessorHandle { token, tasks }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    /// 执行一轮投递
    ///
    /// 查询与认领失败时中止本轮并返回错误；认领之后逐条处理，
    /// 单条回写失败记入 `errors` 并继续下一条。
    pub async fn process_batch(&self, ctx: &HandlerContext) -> Result<BatchReport> {
        let limit = self.config.batch_size;
        let pending = self.repository.find_pending(limit).await?;
        let retryable = self.repository.find_retryable(Utc::now(), limit).await?;

        let mut seen = HashSet::with_capacity(pending.len() + retryable.len());
        let ids: Vec<Uuid> = pending
            .iter()
            .chain(retryable.iter())
            .map(OutboxEntry::id)
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(BatchReport::default());
        }

        let claimed = self.repository.mark_processing(&ids).await?;
        let mut report = BatchReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        for entry in claimed {
            let (entry_id, event_type) = (entry.id(), entry.event_type().to_string());
            match self.process_entry(ctx, entry).await {
                Ok(OutboxStatus::Sent) => report.sent += 1,
                Ok(OutboxStatus::Dead) => report.dead += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(
                        entry_id = %entry_id,
                        event_type = %event_type,
                        error = %err,
                        "outbox entry update failed, left for stuck reclaim"
                    );
                }
            }
        }
        Ok(report)
    }

    /// 回收滞留在 `Processing` 的记录，计一次失败后重新进入重试；返回回收条数
    pub async fn reclaim_stuck(&self) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.config.stuck_timeout)
            .map_err(|e| DomainError::invalid_state(format!("invalid stuck timeout: {e}")))?;
        let stuck = self
            .repository
            .find_stuck(Utc::now() - timeout, self.config.batch_size)
            .await?;

        let mut reclaimed = 0;
        for mut entry in stuck {
            entry.mark_failed("processing claim expired");
            match self.repository.update(&entry).await {
                Ok(()) => {
                    reclaimed += 1;
                    tracing::warn!(
                        entry_id = %entry.id(),
                        event_type = entry.event_type(),
                        status = ?entry.status(),
                        retry_count = entry.retry_count(),
                        "stuck outbox entry reclaimed"
                    );
                }
                Err(err) => {
                    tracing::error!(entry_id = %entry.id(), error = %err, "outbox stuck reclaim update failed");
                }
            }
        }
        Ok(reclaimed)
    }

    async fn process_entry(
        &self,
        ctx: &HandlerContext,
        mut entry: OutboxEntry,
    ) -> Result<OutboxStatus> {
        let event: SharedEvent = match self
            .serializer
            .deserialize(entry.event_type(), entry.payload())
        {
            Ok(event) => Arc::from(event),
            Err(err) => {
                return self
                    .record_failure(entry, format!("deserialize failed: {err}"))
                    .await;
            }
        };

        match self.publisher.publish(ctx, std::slice::from_ref(&event)).await {
            Ok(()) => {
                entry.mark_sent();
                self.repository.update(&entry).await?;
                tracing::debug!(
                    entry_id = %entry.id(),
                    event_id = %entry.event_id(),
                    event_type = entry.event_type(),
                    "outbox entry sent"
                );
                Ok(OutboxStatus::Sent)
            }
            Err(err) => {
                self.record_failure(entry, format!("publish failed: {err}"))
                    .await
            }
        }
    }

    async fn record_failure(&self, mut entry: OutboxEntry, reason: String) -> Result<OutboxStatus> {
        entry.mark_failed(reason);
        self.repository.update(&entry).await?;

        if entry.status() == OutboxStatus::Dead {
            tracing::warn!(
                entry_id = %entry.id(),
                event_id = %entry.event_id(),
                event_type = entry.event_type(),
                retry_count = entry.retry_count(),
                last_error = entry.last_error().unwrap_or_default(),
                "outbox entry moved to dead letter, manual reset required"
            );
        } else {
            tracing::debug!(
                entry_id = %entry.id(),
                event_type = entry.event_type(),
                retry_count = entry.retry_count(),
                last_error = entry.last_error().unwrap_or_default(),
                "outbox entry failed, retry scheduled"
            );
        }
        Ok(entry.status())
    }

    /// 删除超过保留期的 `Sent` 记录
    pub async fn cleanup(&self) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.config.cleanup_retention)
            .map_err(|e| DomainError::invalid_state(format!("invalid cleanup retention: {e}")))?;
        let deleted = self.repository.delete_older_than(Utc::now() - retention).await?;
        if deleted > 0 {
            tracing::info!(deleted, "outbox cleanup finished");
        }
        Ok(deleted)
    }

    /// 人工重置一条死信，使其重新进入投递
    pub async fn retry_dead(&self, id: Uuid) -> Result<OutboxEntry> {
        let mut entry = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                reason: format!("outbox entry {id}"),
            })?;
        entry.reset_for_retry()?;
        self.repository.update(&entry).await?;
        tracing::info!(entry_id = %id, event_type = entry.event_type(), "dead outbox entry reset");
        Ok(entry)
    }

    /// 各状态的记录数，缺失的状态补 0
    pub async fn status_counts(&self) -> Result<HashMap<OutboxStatus, u64>> {
        let mut counts = self.repository.count_by_status().await?;
        for status in OutboxStatus::ALL {
            counts.entry(status).or_insert(0);
        }
        Ok(counts)
    }

    pub fn config(&self) -> &OutboxProcessorConfig {
        &self.config
    }
}

/// 处理器运行句柄：用于优雅关闭与等待任务结束
pub struct ProcessorHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessorHandle {
    /// 发出取消信号，不再开始新的轮次
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }

    /// 取消并等待进行中的批次结束；超过 `deadline` 返回 `false`
    pub async fn stop(self, deadline: Duration) -> bool {
        self.shutdown();
        let stopped = time::timeout(deadline, self.join()).await.is_ok();
        if stopped {
            tracing::info!("outbox processor stopped");
        } else {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "outbox processor stop timed out");
        }
        stopped
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
