//! Postgres 版 Outbox 仓储（PgOutboxRepository，feature `infra-sqlx`）
//!
//! 认领使用 `FOR UPDATE SKIP LOCKED`：多个处理器实例并发轮询时，
//! 已被其他事务锁住的行直接跳过，不会等待，也不会被重复认领。
//!
use super::entry::{OutboxEntry, OutboxStatus};
use super::repository::{OutboxRepository, OutboxUnitOfWork, Page, PageRequest};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_create_outbox_events.sql");

const COLUMNS: &str = "id, tenant_id, event_id, event_type, aggregate_id, aggregate_type, \
    payload, status, retry_count, max_retries, last_error, next_retry_at, processed_at, \
    created_at, updated_at";

// 每行 15 个绑定参数，Postgres 单条语句上限 65535
const INSERT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 创建 `outbox_events` 表及索引（幂等）
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

async fn insert_entries<'e, E>(executor: E, entries: &[OutboxEntry]) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO outbox_events ({COLUMNS}) "));
    qb.push_values(entries, |mut b, e| {
        b.push_bind(e.id())
            .push_bind(e.tenant_id())
            .push_bind(e.event_id())
            .push_bind(e.event_type())
            .push_bind(e.aggregate_id())
            .push_bind(e.aggregate_type())
            .push_bind(e.payload())
            .push_bind(e.status().as_str())
            .push_bind(to_i32(e.retry_count()))
            .push_bind(to_i32(e.max_retries()))
            .push_bind(e.last_error())
            .push_bind(e.next_retry_at())
            .push_bind(e.processed_at())
            .push_bind(e.created_at())
            .push_bind(e.updated_at());
    });
    qb.build().execute(executor).await?;
    Ok(())
}

fn entry_from_row(row: &PgRow) -> Result<OutboxEntry> {
    let status: String = row.try_get("status")?;
    Ok(OutboxEntry::builder()
        .id(row.try_get("id")?)
        .tenant_id(row.try_get("tenant_id")?)
        .event_id(row.try_get("event_id")?)
        .event_type(row.try_get::<String, _>("event_type")?)
        .aggregate_id(row.try_get("aggregate_id")?)
        .aggregate_type(row.try_get::<String, _>("aggregate_type")?)
        .payload(row.try_get("payload")?)
        .status(status.parse::<OutboxStatus>()?)
        .retry_count(to_u32(row.try_get("retry_count")?))
        .max_retries(to_u32(row.try_get("max_retries")?))
        .maybe_last_error(row.try_get("last_error")?)
        .maybe_next_retry_at(row.try_get("next_retry_at")?)
        .maybe_processed_at(row.try_get("processed_at")?)
        .created_at(row.try_get("created_at")?)
        .updated_at(row.try_get("updated_at")?)
        .build())
}

fn entries_from_rows(rows: &[PgRow]) -> Result<Vec<OutboxEntry>> {
    rows.iter().map(entry_from_row).collect()
}

#[async_trait]
impl<'c> OutboxUnitOfWork for Transaction<'c, Postgres> {
    async fn insert_outbox_entries(&mut self, entries: &[OutboxEntry]) -> Result<()> {
        for chunk in entries.chunks(INSERT_CHUNK) {
            insert_entries(&mut **self, chunk).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn save(&self, entries: &[OutboxEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        tx.insert_outbox_entries(entries).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events \
             WHERE status = 'PENDING' \
             ORDER BY created_at ASC \
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        entries_from_rows(&rows)
    }

    async fn find_retryable(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events \
             WHERE status = 'FAILED' AND next_retry_at <= $1 \
             ORDER BY next_retry_at ASC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        entries_from_rows(&rows)
    }

    async fn find_stuck(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events \
             WHERE status = 'PROCESSING' AND updated_at <= $1 \
             ORDER BY updated_at ASC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        entries_from_rows(&rows)
    }

    async fn mark_processing(&self, ids: &[Uuid]) -> Result<Vec<OutboxEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            WITH claimable AS (
                SELECT id FROM outbox_events
                WHERE id = ANY($1)
                  AND status IN ('PENDING', 'FAILED')
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events
            SET status = 'PROCESSING', next_retry_at = NULL, updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING {COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        let mut claimed: HashMap<Uuid, OutboxEntry> = entries_from_rows(&rows)?
            .into_iter()
            .map(|e| (e.id(), e))
            .collect();

        // RETURNING 不保证顺序，按调用方给出的顺序返回
        Ok(ids.iter().filter_map(|id| claimed.remove(id)).collect())
    }

    async fn update(&self, entry: &OutboxEntry) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = $2, retry_count = $3, max_retries = $4, last_error = $5, \
                 next_retry_at = $6, processed_at = $7, updated_at = $8, payload = $9 \
             WHERE id = $1",
        )
        .bind(entry.id())
        .bind(entry.status().as_str())
        .bind(to_i32(entry.retry_count()))
        .bind(to_i32(entry.max_retries()))
        .bind(entry.last_error())
        .bind(entry.next_retry_at())
        .bind(entry.processed_at())
        .bind(entry.updated_at())
        .bind(entry.payload())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound {
                reason: format!("outbox entry {}", entry.id()),
            });
        }
        Ok(())
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'SENT' AND processed_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_dead(&self, page: PageRequest) -> Result<Page<OutboxEntry>> {
        let page = PageRequest::new(page.page, page.size);
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE status = 'DEAD'")
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_events \
             WHERE status = 'DEAD' \
             ORDER BY updated_at DESC \
             LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(page.size))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: entries_from_rows(&rows)?,
            total: total.max(0) as u64,
            page: page.page,
            size: page.size,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM outbox_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn count_by_status(&self) -> Result<HashMap<OutboxStatus, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse::<OutboxStatus>()?, count.max(0) as u64)))
            .collect()
    }
}
