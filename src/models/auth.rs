//! Authentication-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserSnapshot;

/// Login request
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// 登录/注册成功的返回
#[derive(Debug, Clone, Serialize)]
pub struct AuthSuccess {
    pub success: bool,
    pub user: UserSnapshot,
}

impl AuthSuccess {
    pub fn new(user: UserSnapshot) -> Self {
        Self {
            success: true,
            user,
        }
    }
}

/// 登录尝试计数状态
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub blocked: bool,
    pub attempts: u32,
    pub remaining_attempts: u32,
    pub lockout_expires_at: Option<DateTime<Utc>>,
}

/// Remember-token record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RememberToken {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// bostarter_remember Cookie 的内容
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RememberCookie {
    pub email: String,
    pub token: String,
    pub expiry: i64,
}
