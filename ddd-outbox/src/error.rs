//! 统一错误定义
//!
//! 覆盖 Outbox 状态机、事件序列化/版本升级、事件总线、仓储与幂等存储，
//! 各实现层统一转换为 `DomainError` 后向上传播。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化/版本升级 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("invalid upgrade chain for {event_type}: {reason}")]
    InvalidUpgradeChain { event_type: String, reason: String },
    #[error("upgrade failed: type={event_type}, from_version={from_version}, reason={reason}")]
    UpgradeFailed {
        event_type: String,
        from_version: u32,
        reason: String,
    },
    #[error("cannot downgrade {event_type} from version {from_version} to {to_version}")]
    CannotDowngrade {
        event_type: String,
        from_version: u32,
        to_version: u32,
    },
    #[error("unsupported version: type={event_type}, version={version}")]
    UnsupportedVersion { event_type: String, version: u32 },

    // --- 事件系统 ---
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("idempotency store error: {reason}")]
    IdempotencyStore { reason: String },

    // --- 仓储/持久化 ---
    #[error("repository error: {reason}")]
    Repository { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },

    // --- 状态校验 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
}

impl DomainError {
    pub fn event_bus(reason: impl Into<String>) -> Self {
        DomainError::EventBus {
            reason: reason.into(),
        }
    }

    pub fn repository(reason: impl Into<String>) -> Self {
        DomainError::Repository {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        DomainError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn unknown_event_type(event_type: impl Into<String>) -> Self {
        DomainError::UnknownEventType {
            event_type: event_type.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// ---- Cross-crate conversions for infrastructure convenience ----

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}
