//! 服务端会话
//! 会话数据按随机 ID 存储，ID 通过 Cookie 传递

use crate::{error::AppError, models::user::UserSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 生成十六进制随机令牌
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// 单个标识的登录尝试计数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptCounter {
    pub count: u32,
    pub first_attempt: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

/// 会话内容
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionData {
    pub user_id: Option<i64>,
    pub login_time: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_regeneration: Option<DateTime<Utc>>,
    pub user: Option<UserSnapshot>,
    pub csrf_token: Option<String>,
    pub csrf_token_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub login_attempts: HashMap<String, AttemptCounter>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        *self == SessionData::default()
    }
}

/// 一次请求中的会话句柄
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: SessionData,
    /// 本次请求中被替换掉的旧 ID，保存时删除
    retired_ids: Vec<String>,
    destroyed: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: random_token(32),
            data: SessionData::default(),
            retired_ids: Vec::new(),
            destroyed: false,
        }
    }

    pub fn restore(id: String, data: SessionData) -> Self {
        Self {
            id,
            data,
            retired_ids: Vec::new(),
            destroyed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }

    /// 更换会话 ID，保留数据（防止会话固定）
    pub fn regenerate_id(&mut self) {
        let old = std::mem::replace(&mut self.id, random_token(32));
        self.retired_ids.push(old);
    }

    /// 清空数据并换成新的 ID；重复调用无副作用
    pub fn destroy(&mut self) {
        if self.destroyed && self.data.is_empty() {
            return;
        }
        self.data = SessionData::default();
        self.regenerate_id();
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn take_retired_ids(&mut self) -> Vec<String> {
        std::mem::take(&mut self.retired_ids)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话存储
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError>;

    /// 保存会话并删除被轮换掉的旧 ID；数据为空时只删除
    async fn save(&self, session: &mut Session, now: DateTime<Utc>) -> Result<(), AppError>;

    /// 删除最后访问早于 `idle_before` 的会话
    async fn purge_idle(&self, idle_before: DateTime<Utc>) -> Result<u64, AppError>;
}

/// 进程内会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, (SessionData, DateTime<Utc>)>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, AppError> {
        Ok(self.sessions.get(id).map(|entry| entry.value().0.clone()))
    }

    async fn save(&self, session: &mut Session, now: DateTime<Utc>) -> Result<(), AppError> {
        for old in session.take_retired_ids() {
            self.sessions.remove(&old);
        }

        if session.data().is_empty() {
            self.sessions.remove(session.id());
        } else {
            self.sessions
                .insert(session.id().to_string(), (session.data().clone(), now));
        }

        Ok(())
    }

    async fn purge_idle(&self, idle_before: DateTime<Utc>) -> Result<u64, AppError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, (_, touched)| *touched >= idle_before);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}
