//! 内存版 Outbox 仓储（InMemoryOutboxRepository）
//!
//! 以 `Mutex` 保护全部行，认领操作在同一把锁内完成，天然满足
//! “同一行不会被两个调用方同时认领”。典型用途：测试、示例与本地开发。
//!
//! [`InMemoryUnitOfWork`] 模拟业务事务：写入先暂存，`commit` 后才对
//! 处理器可见，`rollback`（或直接丢弃）则全部作废。
//!
use super::entry::{OutboxEntry, OutboxStatus};
use super::repository::{OutboxRepository, OutboxUnitOfWork, Page, PageRequest};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    inner: Arc<Mutex<Rows>>,
}

#[derive(Default)]
struct Rows {
    by_id: HashMap<Uuid, Row>,
    // 插入序号，用于创建时间相同时保持写入顺序
    seq: u64,
}

struct Row {
    seq: u64,
    entry: OutboxEntry,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启一个模拟事务
    pub fn begin(&self) -> InMemoryUnitOfWork {
        InMemoryUnitOfWork {
            repository: self.clone(),
            staged: Vec::new(),
        }
    }

    /// 当前全部行（按写入顺序），便于断言
    pub fn snapshot(&self) -> Result<Vec<OutboxEntry>> {
        let rows = self.lock()?;
        let mut all: Vec<&Row> = rows.by_id.values().collect();
        all.sort_by_key(|r| r.seq);
        Ok(all.into_iter().map(|r| r.entry.clone()).collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.by_id.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows>> {
        self.inner
            .lock()
            .map_err(|_| DomainError::repository("in-memory outbox lock poisoned"))
    }

    fn insert_all(&self, entries: &[OutboxEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut rows = self.lock()?;
        // 先整体校验再写入，保证要么全部成功要么全部失败
        let mut event_ids: HashSet<Uuid> = rows.by_id.values().map(|r| r.entry.event_id()).collect();
        for entry in entries {
            if rows.by_id.contains_key(&entry.id()) {
                return Err(DomainError::repository(format!(
                    "duplicate outbox entry id: {}",
                    entry.id()
                )));
            }
            if !event_ids.insert(entry.event_id()) {
                return Err(DomainError::repository(format!(
                    "duplicate outbox event id: {}",
                    entry.event_id()
                )));
            }
        }
        for entry in entries {
            rows.seq += 1;
            let seq = rows.seq;
            rows.by_id.insert(
                entry.id(),
                Row {
                    seq,
                    entry: entry.clone(),
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn save(&self, entries: &[OutboxEntry]) -> Result<()> {
        self.insert_all(entries)
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = self.lock()?;
        let mut pending: Vec<&Row> = rows
            .by_id
            .values()
            .filter(|r| r.entry.status() == OutboxStatus::Pending)
            .collect();
        pending.sort_by_key(|r| (r.entry.created_at(), r.seq));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|r| r.entry.clone())
            .collect())
    }

    async fn find_retryable(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        let rows = self.lock()?;
        let mut retryable: Vec<&Row> = rows
            .by_id
            .values()
            .filter(|r| {
                r.entry.status() == OutboxStatus::Failed
                    && r.entry.next_retry_at().is_some_and(|at| at <= before)
            })
            .collect();
        retryable.sort_by_key(|r| (r.entry.next_retry_at(), r.seq));
        Ok(retryable
            .into_iter()
            .take(limit)
            .map(|r| r.entry.clone())
            .collect())
    }

    async fn find_stuck(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = self.lock()?;
        let mut stuck: Vec<&Row> = rows
            .by_id
            .values()
            .filter(|r| {
                r.entry.status() == OutboxStatus::Processing && r.entry.updated_at() <= before
            })
            .collect();
        stuck.sort_by_key(|r| (r.entry.updated_at(), r.seq));
        Ok(stuck
            .into_iter()
            .take(limit)
            .map(|r| r.entry.clone())
            .collect())
    }

    async fn mark_processing(&self, ids: &[Uuid]) -> Result<Vec<OutboxEntry>> {
        let mut rows = self.lock()?;
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(row) = rows.by_id.get_mut(id) else {
                continue;
            };
            // 已被认领或已终结的行直接跳过
            if row.entry.mark_processing().is_ok() {
                claimed.push(row.entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn update(&self, entry: &OutboxEntry) -> Result<()> {
        let mut rows = self.lock()?;
        match rows.by_id.get_mut(&entry.id()) {
            Some(row) => {
                row.entry = entry.clone();
                Ok(())
            }
            None => Err(DomainError::NotFound {
                reason: format!("outbox entry {}", entry.id()),
            }),
        }
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.lock()?;
        let count = rows.by_id.len();
        rows.by_id.retain(|_, r| {
            !(r.entry.status() == OutboxStatus::Sent
                && r.entry.processed_at().is_some_and(|at| at < before))
        });
        Ok((count - rows.by_id.len()) as u64)
    }

    async fn find_dead(&self, page: PageRequest) -> Result<Page<OutboxEntry>> {
        let page = PageRequest::new(page.page, page.size);
        let rows = self.lock()?;
        let mut dead: Vec<&Row> = rows
            .by_id
            .values()
            .filter(|r| r.entry.status() == OutboxStatus::Dead)
            .collect();
        // 最近进入死信的排在前面
        dead.sort_by(|a, b| {
            b.entry
                .updated_at()
                .cmp(&a.entry.updated_at())
                .then(b.seq.cmp(&a.seq))
        });

        let total = dead.len() as u64;
        let items = dead
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .map(|r| r.entry.clone())
            .collect();
        Ok(Page {
            items,
            total,
            page: page.page,
            size: page.size,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>> {
        Ok(self.lock()?.by_id.get(&id).map(|r| r.entry.clone()))
    }

    async fn count_by_status(&self) -> Result<HashMap<OutboxStatus, u64>> {
        let rows = self.lock()?;
        let mut counts: HashMap<OutboxStatus, u64> = HashMap::new();
        for row in rows.by_id.values() {
            *counts.entry(row.entry.status()).or_default() += 1;
        }
        Ok(counts)
    }
}

/// 模拟事务：暂存写入，提交后才落入仓储
pub struct InMemoryUnitOfWork {
    repository: InMemoryOutboxRepository,
    staged: Vec<OutboxEntry>,
}

impl InMemoryUnitOfWork {
    pub fn staged(&self) -> &[OutboxEntry] {
        &self.staged
    }

    /// 提交，返回写入的记录数
    pub fn commit(self) -> Result<usize> {
        self.repository.insert_all(&self.staged)?;
        Ok(self.staged.len())
    }

    pub fn rollback(self) {}
}

#[async_trait]
impl OutboxUnitOfWork for InMemoryUnitOfWork {
    async fn insert_outbox_entries(&mut self, entries: &[OutboxEntry]) -> Result<()> {
        self.staged.extend_from_slice(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn mk_entry(event_type: &str) -> OutboxEntry {
        OutboxEntry::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            event_type,
            Uuid::new_v4(),
            "SalesOrder",
            br#"{"schema_version":1}"#.to_vec(),
        )
    }

    #[tokio::test]
    async fn save_is_noop_on_empty_and_rejects_duplicates() {
        let repo = InMemoryOutboxRepository::new();
        repo.save(&[]).await.unwrap();
        assert!(repo.is_empty().unwrap());

        let e = mk_entry("A");
        repo.save(std::slice::from_ref(&e)).await.unwrap();
        let err = repo.save(&[mk_entry("B"), e]).await.unwrap_err();
        assert!(matches!(err, DomainError::Repository { .. }));
        // 整批失败，不会写入 B
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn save_rejects_second_entry_for_same_event() {
        let repo = InMemoryOutboxRepository::new();
        let first = mk_entry("A");
        repo.save(std::slice::from_ref(&first)).await.unwrap();

        let again = OutboxEntry::new(
            Uuid::new_v4(),
            first.event_id(),
            "A",
            first.aggregate_id(),
            "SalesOrder",
            first.payload().to_vec(),
        );
        let err = repo.save(&[again]).await.unwrap_err();
        assert!(matches!(err, DomainError::Repository { .. }));
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn find_stuck_returns_only_stale_processing_rows() {
        let repo = InMemoryOutboxRepository::new();
        let entries: Vec<OutboxEntry> = (0..3).map(|_| mk_entry("A")).collect();
        repo.save(&entries).await.unwrap();
        let claimed = repo.mark_processing(&[entries[0].id()]).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let earlier = Utc::now() - chrono::Duration::seconds(60);
        assert!(repo.find_stuck(earlier, 10).await.unwrap().is_empty());

        let stuck = repo.find_stuck(Utc::now(), 10).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id(), entries[0].id());
        assert_eq!(stuck[0].status(), OutboxStatus::Processing);
    }

    #[tokio::test]
    async fn find_pending_is_oldest_first_and_bounded() {
        let repo = InMemoryOutboxRepository::new();
        let entries: Vec<OutboxEntry> = (0..5).map(|i| mk_entry(&format!("E{i}"))).collect();
        repo.save(&entries).await.unwrap();

        let pending = repo.find_pending(3).await.unwrap();
        let types: Vec<&str> = pending.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["E0", "E1", "E2"]);
    }

    #[tokio::test]
    async fn find_retryable_only_returns_due_failed_entries() {
        let repo = InMemoryOutboxRepository::new();
        let mut failed = mk_entry("Failed");
        failed.mark_processing().unwrap();
        failed.mark_failed("broker down");
        let pending = mk_entry("Pending");
        repo.save(&[failed.clone(), pending]).await.unwrap();

        assert!(repo.find_retryable(Utc::now(), 10).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::seconds(5);
        let due = repo.find_retryable(later, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id(), failed.id());
    }

    #[tokio::test]
    async fn mark_processing_skips_already_claimed_rows() {
        let repo = InMemoryOutboxRepository::new();
        let entries: Vec<OutboxEntry> = (0..3).map(|_| mk_entry("A")).collect();
        repo.save(&entries).await.unwrap();
        let ids: Vec<Uuid> = entries.iter().map(|e| e.id()).collect();

        let first = repo.mark_processing(&ids[..2]).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.status() == OutboxStatus::Processing));

        let second = repo.mark_processing(&ids).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id(), ids[2]);

        assert!(repo.mark_processing(&[Uuid::new_v4()]).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_are_disjoint() {
        let repo = InMemoryOutboxRepository::new();
        let entries: Vec<OutboxEntry> = (0..200).map(|_| mk_entry("A")).collect();
        repo.save(&entries).await.unwrap();
        let ids: Vec<Uuid> = entries.iter().map(|e| e.id()).collect();

        // 两个调用方认领有重叠的集合
        let left_ids = ids[..150].to_vec();
        let right_ids = ids[50..].to_vec();
        let left = {
            let repo = repo.clone();
            tokio::spawn(async move { repo.mark_processing(&left_ids).await })
        };
        let right = {
            let repo = repo.clone();
            tokio::spawn(async move { repo.mark_processing(&right_ids).await })
        };
        let left = left.await.unwrap().unwrap();
        let right = right.await.unwrap().unwrap();

        let left: HashSet<Uuid> = left.iter().map(|e| e.id()).collect();
        let right: HashSet<Uuid> = right.iter().map(|e| e.id()).collect();
        assert!(left.is_disjoint(&right));
        let union: HashSet<Uuid> = left.union(&right).copied().collect();
        assert_eq!(union, ids.into_iter().collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn delete_older_than_only_removes_old_sent_rows() {
        let repo = InMemoryOutboxRepository::new();

        let mut sent = mk_entry("Sent");
        sent.mark_processing().unwrap();
        sent.mark_sent();

        let pending = mk_entry("Pending");

        let mut failed = mk_entry("Failed");
        failed.mark_failed("x");

        let mut dead = mk_entry("Dead").with_max_retries(1);
        dead.mark_failed("x");

        repo.save(&[sent.clone(), pending, failed, dead])
            .await
            .unwrap();

        // 截止时间早于发送时间：不删除
        let before_sent = sent.processed_at().unwrap() - chrono::Duration::seconds(1);
        assert_eq!(repo.delete_older_than(before_sent).await.unwrap(), 0);

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(repo.delete_older_than(cutoff).await.unwrap(), 1);
        assert!(repo.find_by_id(sent.id()).await.unwrap().is_none());

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts.get(&OutboxStatus::Pending), Some(&1));
        assert_eq!(counts.get(&OutboxStatus::Failed), Some(&1));
        assert_eq!(counts.get(&OutboxStatus::Dead), Some(&1));
        assert_eq!(counts.get(&OutboxStatus::Sent), None);
    }

    #[tokio::test]
    async fn find_dead_pages_through_dead_entries() {
        let repo = InMemoryOutboxRepository::new();
        let mut entries = Vec::new();
        for _ in 0..5 {
            let mut e = mk_entry("A").with_max_retries(1);
            e.mark_failed("x");
            entries.push(e);
        }
        entries.push(mk_entry("Alive"));
        repo.save(&entries).await.unwrap();

        let first = repo.find_dead(PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total_pages(), 3);

        let last = repo.find_dead(PageRequest::new(3, 2)).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.items.iter().all(|e| e.status() == OutboxStatus::Dead));
    }

    #[tokio::test]
    async fn update_unknown_entry_is_not_found() {
        let repo = InMemoryOutboxRepository::new();
        let err = repo.update(&mk_entry("A")).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unit_of_work_commit_and_rollback() {
        let repo = InMemoryOutboxRepository::new();

        let mut tx = repo.begin();
        repo.save_in(&mut tx, &[mk_entry("A")]).await.unwrap();
        assert_eq!(tx.staged().len(), 1);
        tx.rollback();
        assert!(repo.is_empty().unwrap());

        let mut tx = repo.begin();
        repo.save_in(&mut tx, &[mk_entry("A"), mk_entry("B")])
            .await
            .unwrap();
        assert!(repo.is_empty().unwrap());
        assert_eq!(tx.commit().unwrap(), 2);
        assert_eq!(repo.find_pending(10).await.unwrap().len(), 2);
    }
}
