//! Outbox 记录（OutboxEntry）与状态机
//!
//! ```text
//! Pending ──▶ Processing ──▶ Sent
//!    ▲            │
//!    │            ▼
//!    │         Failed ──(重试)──▶ Processing
//!    │            │
//!    └── reset ── Dead（retry_count 达到 max_retries）
//! ```
//!
use crate::domain_event::AnyEvent;
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// 单条记录默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 指数退避的基数：1s, 2s, 4s, 8s, ...
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

// 2^20 秒已超过 12 天，再大没有意义，同时避免移位溢出
const MAX_BACKOFF_EXPONENT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 5] = [
        OutboxStatus::Pending,
        OutboxStatus::Processing,
        OutboxStatus::Sent,
        OutboxStatus::Failed,
        OutboxStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Dead)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            "DEAD" => Ok(OutboxStatus::Dead),
            other => Err(DomainError::Parse {
                reason: format!("unknown outbox status: {other}"),
            }),
        }
    }
}

/// 第 `retry_count` 次失败后的等待时长：`BASE_BACKOFF * 2^(retry_count-1)`
pub fn backoff_delay(retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    BASE_BACKOFF * (1u32 << exponent)
}

/// 持久化的待投递事件
///
/// 不变式：
/// - `retry_count <= max_retries`
/// - `next_retry_at` 有值当且仅当 `status == Failed`
/// - `processed_at` 有值当且仅当 `status == Sent`
///
/// `builder()` 仅用于从存储层还原记录，新记录请使用 [`OutboxEntry::new`]。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct OutboxEntry {
    #[builder(default = Uuid::new_v4())]
    id: Uuid,
    tenant_id: Uuid,
    event_id: Uuid,
    #[builder(into)]
    event_type: String,
    aggregate_id: Uuid,
    #[builder(into)]
    aggregate_type: String,
    payload: Vec<u8>,
    #[builder(default = OutboxStatus::Pending)]
    status: OutboxStatus,
    #[builder(default)]
    retry_count: u32,
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(
        tenant_id: Uuid,
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: Uuid,
        aggregate_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_id,
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            next_retry_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 以事件元数据填充记录，`payload` 为已序列化的事件
    pub fn from_event(event: &dyn AnyEvent, payload: Vec<u8>) -> Self {
        Self::new(
            event.tenant_id(),
            event.event_id(),
            event.event_type(),
            event.aggregate_id(),
            event.aggregate_type(),
            payload,
        )
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 认领：仅允许 `Pending` 或 `Failed`
    pub fn mark_processing(&mut self) -> DomainResult<()> {
        match self.status {
            OutboxStatus::Pending | OutboxStatus::Failed => {
                self.status = OutboxStatus::Processing;
                self.next_retry_at = None;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(DomainError::invalid_state(format!(
                "cannot mark outbox entry {} as PROCESSING from {other}",
                self.id
            ))),
        }
    }

    pub fn mark_sent(&mut self) {
        let now = Utc::now();
        self.status = OutboxStatus::Sent;
        self.next_retry_at = None;
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// 记录一次失败；次数耗尽则进入 `Dead`，否则按指数退避安排下次重试
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
        self.last_error = Some(reason.into());
        self.processed_at = None;
        self.updated_at = now;

        if self.retry_count >= self.max_retries {
            self.status = OutboxStatus::Dead;
            self.next_retry_at = None;
        } else {
            self.status = OutboxStatus::Failed;
            let delay_ms = backoff_delay(self.retry_count).as_millis() as i64;
            self.next_retry_at = Some(now + chrono::Duration::milliseconds(delay_ms));
        }
    }

    pub fn can_retry(&self) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count < self.max_retries
    }

    /// 人工重置死信：仅允许 `Dead`
    pub fn reset_for_retry(&mut self) -> DomainResult<()> {
        if self.status != OutboxStatus::Dead {
            return Err(DomainError::invalid_state(format!(
                "cannot reset outbox entry {} from {}, only DEAD entries can be reset",
                self.id, self.status
            )));
        }
        self.status = OutboxStatus::Pending;
        self.retry_count = 0;
        self.last_error = None;
        self.next_retry_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 是否已到重试时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.next_retry_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_entry() -> OutboxEntry {
        OutboxEntry::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "SalesOrderCreated",
            Uuid::new_v4(),
            "SalesOrder",
            br#"{"schema_version":1}"#.to_vec(),
        )
    }

    fn assert_invariants(e: &OutboxEntry) {
        assert!(e.retry_count() <= e.max_retries());
        assert_eq!(e.next_retry_at().is_some(), e.status() == OutboxStatus::Failed);
        assert_eq!(e.processed_at().is_some(), e.status() == OutboxStatus::Sent);
    }

    #[test]
    fn new_entry_is_pending() {
        let e = mk_entry();
        assert_eq!(e.status(), OutboxStatus::Pending);
        assert_eq!(e.retry_count(), 0);
        assert_eq!(e.max_retries(), DEFAULT_MAX_RETRIES);
        assert!(e.last_error().is_none());
        assert_invariants(&e);
    }

    #[test]
    fn happy_path_pending_processing_sent() {
        let mut e = mk_entry();
        e.mark_processing().unwrap();
        assert_eq!(e.status(), OutboxStatus::Processing);
        assert_invariants(&e);

        e.mark_sent();
        assert_eq!(e.status(), OutboxStatus::Sent);
        assert!(e.processed_at().is_some());
        assert_invariants(&e);
    }

    #[test]
    fn mark_processing_rejected_from_terminal_and_processing_states() {
        let mut sent = mk_entry();
        sent.mark_processing().unwrap();
        sent.mark_sent();
        let err = sent.mark_processing().unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert_eq!(sent.status(), OutboxStatus::Sent);

        let mut processing = mk_entry();
        processing.mark_processing().unwrap();
        assert!(processing.mark_processing().is_err());

        let mut dead = mk_entry().with_max_retries(1);
        dead.mark_failed("boom");
        assert_eq!(dead.status(), OutboxStatus::Dead);
        assert!(dead.mark_processing().is_err());
    }

    #[test]
    fn failed_entry_can_be_claimed_again() {
        let mut e = mk_entry();
        e.mark_processing().unwrap();
        e.mark_failed("broker down");
        assert!(e.can_retry());

        e.mark_processing().unwrap();
        assert_eq!(e.status(), OutboxStatus::Processing);
        assert!(e.next_retry_at().is_none());
        assert_invariants(&e);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let expected = [1u64, 2, 4, 8, 16];
        for (i, secs) in expected.iter().enumerate() {
            assert_eq!(backoff_delay(i as u32 + 1), Duration::from_secs(*secs));
        }
        assert_eq!(backoff_delay(0), BASE_BACKOFF);
    }

    #[test]
    fn mark_failed_schedules_strictly_increasing_retries() {
        let mut e = mk_entry().with_max_retries(10);
        let mut last_delay = chrono::Duration::zero();
        for retry in 1..=5u32 {
            e.mark_processing().unwrap();
            e.mark_failed(format!("attempt {retry}"));
            assert_eq!(e.status(), OutboxStatus::Failed);
            assert_eq!(e.retry_count(), retry);

            let delay = e.next_retry_at().unwrap() - e.updated_at();
            assert_eq!(delay.num_seconds(), 1i64 << (retry - 1));
            assert!(delay > last_delay);
            last_delay = delay;
            assert_invariants(&e);
        }
        assert_eq!(e.last_error(), Some("attempt 5"));
    }

    #[test]
    fn fifth_failure_moves_entry_to_dead() {
        let mut e = mk_entry();
        for _ in 0..4 {
            e.mark_processing().unwrap();
            e.mark_failed("handler unreachable");
            assert_eq!(e.status(), OutboxStatus::Failed);
        }
        assert_eq!(e.retry_count(), 4);

        e.mark_processing().unwrap();
        e.mark_failed("handler unreachable");
        assert_eq!(e.status(), OutboxStatus::Dead);
        assert_eq!(e.retry_count(), 5);
        assert!(!e.can_retry());
        assert_invariants(&e);

        // 再次失败不会突破上限
        e.mark_failed("again");
        assert_eq!(e.retry_count(), 5);
        assert_invariants(&e);
    }

    #[test]
    fn reset_for_retry_only_from_dead() {
        let mut pending = mk_entry();
        assert!(pending.reset_for_retry().is_err());

        let mut processing = mk_entry();
        processing.mark_processing().unwrap();
        assert!(processing.reset_for_retry().is_err());

        let mut failed = mk_entry();
        failed.mark_failed("x");
        assert_eq!(failed.status(), OutboxStatus::Failed);
        assert!(failed.reset_for_retry().is_err());

        let mut sent = mk_entry();
        sent.mark_sent();
        assert!(sent.reset_for_retry().is_err());

        let mut dead = mk_entry().with_max_retries(1);
        dead.mark_failed("x");
        dead.reset_for_retry().unwrap();
        assert_eq!(dead.status(), OutboxStatus::Pending);
        assert_eq!(dead.retry_count(), 0);
        assert!(dead.last_error().is_none());
        assert_invariants(&dead);
    }

    #[test]
    fn status_string_roundtrip() {
        for status in OutboxStatus::ALL {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("UNKNOWN".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn is_due_respects_next_retry_at() {
        let mut e = mk_entry();
        assert!(e.is_due(Utc::now()));
        e.mark_processing().unwrap();
        assert!(!e.is_due(Utc::now()));
        e.mark_failed("x");
        assert!(!e.is_due(Utc::now()));
        assert!(e.is_due(Utc::now() + chrono::Duration::seconds(2)));
    }
}
