//! Outbox 仓储协议（OutboxRepository）与工作单元（OutboxUnitOfWork）
//!
//! 仓储只负责 `outbox_events` 的读写；与业务状态同事务的写入通过
//! [`OutboxUnitOfWork`] 完成，调用方传入自己的事务句柄，仓储不会自行开启事务。
//!
use super::entry::{OutboxEntry, OutboxStatus};
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// 业务事务的窄接口：只暴露写入 outbox 所需的一个操作
#[async_trait]
pub trait OutboxUnitOfWork: Send {
    async fn insert_outbox_entries(&mut self, entries: &[OutboxEntry]) -> Result<()>;
}

/// 分页参数，`page` 从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page: page.max(1),
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.size))
    }
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 独立写入（不参与业务事务），空输入不做任何操作
    async fn save(&self, entries: &[OutboxEntry]) -> Result<()>;

    /// 在调用方的事务中写入
    async fn save_in(
        &self,
        uow: &mut dyn OutboxUnitOfWork,
        entries: &[OutboxEntry],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        uow.insert_outbox_entries(entries).await
    }

    /// `Pending` 记录，按创建时间升序
    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// `Failed` 且 `next_retry_at <= before` 的记录，按 `next_retry_at` 升序
    async fn find_retryable(&self, before: DateTime<Utc>, limit: usize)
    -> Result<Vec<OutboxEntry>>;

    /// `updated_at <= before` 仍处于 `Processing` 的记录（认领后进程崩溃或回写失败遗留）
    async fn find_stuck(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// 原子认领：跳过已被其他调用方锁定/认领的行，仅返回本次成功认领的记录
    async fn mark_processing(&self, ids: &[Uuid]) -> Result<Vec<OutboxEntry>>;

    async fn update(&self, entry: &OutboxEntry) -> Result<()>;

    /// 删除 `processed_at < before` 的 `Sent` 记录，返回删除条数
    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64>;

    async fn find_dead(&self, page: PageRequest) -> Result<Page<OutboxEntry>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>>;

    async fn count_by_status(&self) -> Result<HashMap<OutboxStatus, u64>>;
}

#[async_trait]
impl<T> OutboxRepository for Arc<T>
where
    T: OutboxRepository + ?Sized,
{
    async fn save(&self, entries: &[OutboxEntry]) -> Result<()> {
        (**self).save(entries).await
    }

    async fn save_in(
        &self,
        uow: &mut dyn OutboxUnitOfWork,
        entries: &[OutboxEntry],
    ) -> Result<()> {
        (**self).save_in(uow, entries).await
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        (**self).find_pending(limit).await
    }

    async fn find_retryable(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        (**self).find_retryable(before, limit).await
    }

    async fn find_stuck(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>> {
        (**self).find_stuck(before, limit).await
    }

    async fn mark_processing(&self, ids: &[Uuid]) -> Result<Vec<OutboxEntry>> {
        (**self).mark_processing(ids).await
    }

    async fn update(&self, entry: &OutboxEntry) -> Result<()> {
        (**self).update(entry).await
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        (**self).delete_older_than(before).await
    }

    async fn find_dead(&self, page: PageRequest) -> Result<Page<OutboxEntry>> {
        (**self).find_dead(page).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>> {
        (**self).find_by_id(id).await
    }

    async fn count_by_status(&self) -> Result<HashMap<OutboxStatus, u64>> {
        (**self).count_by_status().await
    }
}
