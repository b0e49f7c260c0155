//! Security domain models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 安全事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    FailedLogin,
    AccountLocked,
    IpBlocked,
    RateLimitExceeded,
    CsrfFailure,
    InvalidRedirect,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::FailedLogin => "failed_login",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::IpBlocked => "ip_blocked",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::CsrfFailure => "csrf_failure",
            SecurityEventType::InvalidRedirect => "invalid_redirect",
        }
    }
}

/// 待写入的安全事件
#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub event_type: SecurityEventType,
    pub ip_address: String,
    pub user_id: Option<i64>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct IpCount {
    pub ip_address: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct DayCount {
    pub day: NaiveDate,
    pub count: i64,
}

/// 安全统计报表
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SecurityStats {
    pub days: i64,
    pub by_type: Vec<EventTypeCount>,
    pub top_ips: Vec<IpCount>,
    pub by_day: Vec<DayCount>,
}

/// 清理结果
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub security_events_deleted: u64,
    pub rate_limits_deleted: u64,
}
