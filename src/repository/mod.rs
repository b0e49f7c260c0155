//! Database repository layer
//!
//! 每类数据一个存储 trait，PostgreSQL 与内存各有一套实现。

pub mod memory;
pub mod remember_repo;
pub mod security_repo;
pub mod user_repo;

pub use memory::{MemoryRememberTokenStore, MemorySecurityStore, MemoryUserStore};
pub use remember_repo::RememberTokenRepository;
pub use security_repo::SecurityRepository;
pub use user_repo::UserRepository;

use crate::{
    error::AppError,
    models::{
        auth::RememberToken,
        security::{DayCount, EventTypeCount, IpCount, NewSecurityEvent, SecurityEventType},
        user::{NewUser, User},
    },
    session::{MemorySessionStore, SessionStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AppError>;

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, AppError>;

    /// 唯一约束冲突时返回 `AppError::Conflict("email" | "nickname")`
    async fn create(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, AppError>;

    async fn touch_last_access(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError>;
}

#[async_trait]
pub trait RememberTokenStore: Send + Sync {
    async fn store(&self, token: &RememberToken) -> Result<(), AppError>;

    /// 查找未过期的令牌
    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RememberToken>, AppError>;

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, AppError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait SecurityStore: Send + Sync {
    async fn insert_event(&self, event: &NewSecurityEvent) -> Result<(), AppError>;

    /// 是否存在该 IP 在 `since` 之后的指定类型事件
    async fn has_event_since(
        &self,
        event_type: SecurityEventType,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// 原子地递增计数；窗口已过期则重置为 1 并开始新窗口。返回递增后的计数
    async fn hit_counter(
        &self,
        key: &str,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError>;

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;

    async fn delete_expired_counters(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn count_by_type(&self, since: DateTime<Utc>) -> Result<Vec<EventTypeCount>, AppError>;

    async fn top_ips(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<IpCount>, AppError>;

    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, AppError>;
}

/// 应用使用的全部存储
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub remember_tokens: Arc<dyn RememberTokenStore>,
    pub security: Arc<dyn SecurityStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// 会话仍保存在进程内，其余数据写入 PostgreSQL
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            remember_tokens: Arc::new(RememberTokenRepository::new(pool.clone())),
            security: Arc::new(SecurityRepository::new(pool)),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    pub fn memory() -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            remember_tokens: Arc::new(MemoryRememberTokenStore::new()),
            security: Arc::new(MemorySecurityStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }
}
