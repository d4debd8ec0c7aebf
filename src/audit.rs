//! 审计日志模块
//!
//! 记录 magic link 生命周期中的安全事件：签发、兑换被拒、作废、登录成功。
//! [`AuditEvent::LoggedIn`] 同时充当“用户已登录”的观察者通知。
//!
//! 事件中永远不包含原始 token 或摘要。
//!
//! ## 使用示例
//!
//! ```rust
//! use magiclink::UserId;
//! use magiclink::audit::{AuditEvent, AuditLogger, EventKind, InMemoryAuditLogger};
//!
//! let logger = InMemoryAuditLogger::new();
//! logger.record(AuditEvent::LinkIssued { user_id: UserId(42), issued_by: UserId(1) });
//! logger.record(AuditEvent::LoggedIn { user_id: UserId(42), login: "alice".into() });
//!
//! assert_eq!(logger.for_user(UserId(42)).len(), 2);
//! assert_eq!(logger.count(EventKind::LoggedIn), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::user::UserId;

/// 兑换被拒的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// 请求已持有会话
    AlreadyAuthenticated,
    /// 用户不存在
    UnknownUser,
    /// 没有匹配的摘要
    InvalidToken,
}

impl RejectReason {
    /// 从兑换错误映射；非兑换错误返回 `None`
    pub fn from_error(error: &Error) -> Option<Self> {
        match error {
            Error::AlreadyAuthenticated => Some(Self::AlreadyAuthenticated),
            Error::UnknownUser(_) => Some(Self::UnknownUser),
            Error::InvalidToken => Some(Self::InvalidToken),
            _ => None,
        }
    }
}

/// 事件种类，用于过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LinkIssued,
    LinkRejected,
    LinkConsumed,
    LoggedIn,
}

/// 审计事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// 为用户签发了链接
    LinkIssued { user_id: UserId, issued_by: UserId },
    /// 兑换被拒
    LinkRejected { user_id: UserId, reason: RejectReason },
    /// 匹配的记录在兑换后被删除
    LinkConsumed { user_id: UserId },
    /// 通过链接登录成功
    LoggedIn { user_id: UserId, login: String },
}

impl AuditEvent {
    /// 事件种类
    pub fn kind(&self) -> EventKind {
        match self {
            AuditEvent::LinkIssued { .. } => EventKind::LinkIssued,
            AuditEvent::LinkRejected { .. } => EventKind::LinkRejected,
            AuditEvent::LinkConsumed { .. } => EventKind::LinkConsumed,
            AuditEvent::LoggedIn { .. } => EventKind::LoggedIn,
        }
    }

    /// 事件涉及的用户
    pub fn user_id(&self) -> UserId {
        match self {
            AuditEvent::LinkIssued { user_id, .. }
            | AuditEvent::LinkRejected { user_id, .. }
            | AuditEvent::LinkConsumed { user_id }
            | AuditEvent::LoggedIn { user_id, .. } => *user_id,
        }
    }

    /// 是否需要以警告级别记录
    pub fn is_warning(&self) -> bool {
        matches!(self, AuditEvent::LinkRejected { .. })
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::LinkIssued { user_id, issued_by } => {
                write!(f, "magic link issued for user {} by user {}", user_id, issued_by)
            }
            AuditEvent::LinkRejected { user_id, reason } => {
                write!(f, "magic link rejected for user {}: {:?}", user_id, reason)
            }
            AuditEvent::LinkConsumed { user_id } => {
                write!(f, "magic link consumed for user {}", user_id)
            }
            AuditEvent::LoggedIn { user_id, login } => {
                write!(f, "user {} ({}) logged in via magic link", user_id, login)
            }
        }
    }
}

/// 带时间戳的审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(flatten)]
    pub event: AuditEvent,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// AuditLogger
// ============================================================================

/// 审计事件接收方
pub trait AuditLogger: Send + Sync {
    /// 记录事件
    fn record(&self, event: AuditEvent);
}

/// 把事件转发到 `tracing`，target 为 `magiclink::audit`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn record(&self, event: AuditEvent) {
        let user_id = event.user_id().0;
        if event.is_warning() {
            tracing::warn!(target: "magiclink::audit", user_id, "{}", event);
        } else {
            tracing::info!(target: "magiclink::audit", user_id, "{}", event);
        }
    }
}

/// 内存审计日志，用于测试
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLogger {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl InMemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部记录，按记录顺序
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// 涉及某个用户的事件
    pub fn for_user(&self, user_id: UserId) -> Vec<AuditEvent> {
        self.records()
            .into_iter()
            .map(|r| r.event)
            .filter(|e| e.user_id() == user_id)
            .collect()
    }

    /// 某一种类的事件数量
    pub fn count(&self, kind: EventKind) -> usize {
        self.records()
            .iter()
            .filter(|r| r.event.kind() == kind)
            .count()
    }
}

impl AuditLogger for InMemoryAuditLogger {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut records) = self.records.write() {
            records.push(AuditRecord {
                event,
                recorded_at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reject_reason_from_error() {
        assert_eq!(
            RejectReason::from_error(&Error::UnknownUser(UserId(9))),
            Some(RejectReason::UnknownUser)
        );
        assert_eq!(
            RejectReason::from_error(&Error::InvalidToken),
            Some(RejectReason::InvalidToken)
        );
        assert_eq!(RejectReason::from_error(&Error::MissingParameters), None);
    }

    #[test]
    fn test_in_memory_logger_filters() {
        let logger = InMemoryAuditLogger::new();
        logger.record(AuditEvent::LinkIssued {
            user_id: UserId(1),
            issued_by: UserId(9),
        });
        logger.record(AuditEvent::LinkRejected {
            user_id: UserId(2),
            reason: RejectReason::UnknownUser,
        });
        logger.record(AuditEvent::LoggedIn {
            user_id: UserId(1),
            login: "alice".into(),
        });

        assert_eq!(logger.records().len(), 3);
        assert_eq!(logger.for_user(UserId(1)).len(), 2);
        assert_eq!(logger.count(EventKind::LinkRejected), 1);
        assert_eq!(logger.count(EventKind::LinkConsumed), 0);
    }

    #[test]
    fn test_record_serialization() {
        let record = AuditRecord {
            event: AuditEvent::LinkRejected {
                user_id: UserId(3),
                reason: RejectReason::InvalidToken,
            },
            recorded_at: Utc::now(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["event"], json!("link_rejected"));
        assert_eq!(value["user_id"], json!(3));
        assert_eq!(value["reason"], json!("invalid_token"));
    }

    #[test]
    fn test_only_rejections_are_warnings() {
        assert!(
            AuditEvent::LinkRejected {
                user_id: UserId(1),
                reason: RejectReason::InvalidToken
            }
            .is_warning()
        );
        assert!(!AuditEvent::LinkConsumed { user_id: UserId(1) }.is_warning());
    }

    #[test]
    fn test_tracing_logger_does_not_panic() {
        TracingAuditLogger.record(AuditEvent::LinkConsumed { user_id: UserId(1) });
    }
}
