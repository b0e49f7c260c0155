//! 进程内存储实现
//! 用于未配置数据库的开发环境与测试

use super::{RememberTokenStore, SecurityStore, UserStore};
use crate::{
    error::AppError,
    models::{
        auth::RememberToken,
        security::{DayCount, EventTypeCount, IpCount, NewSecurityEvent, SecurityEventType},
        user::{NewUser, User},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<i64, User>,
    next_id: AtomicI64,
    // 插入时的唯一性检查需要串行
    insert_lock: Mutex<()>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn find(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users
            .iter()
            .find(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.find(|u| u.email.eq_ignore_ascii_case(email)).is_some())
    }

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, AppError> {
        Ok(self
            .find(|u| u.nickname.eq_ignore_ascii_case(nickname))
            .is_some())
    }

    async fn create(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, AppError> {
        let _guard = self.insert_lock.lock().await;

        if self.email_exists(&user.email).await? {
            return Err(AppError::Conflict("email".to_string()));
        }
        if self.nickname_exists(&user.nickname).await? {
            return Err(AppError::Conflict("nickname".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = User {
            id,
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            password_hash: user.password_hash.clone(),
            nome: user.nome.clone(),
            cognome: user.cognome.clone(),
            anno_nascita: user.anno_nascita,
            luogo_nascita: user.luogo_nascita.clone(),
            tipo_utente: user.tipo_utente.as_str().to_string(),
            ultimo_accesso: None,
            created_at: now,
        };
        self.users.insert(id, record.clone());

        Ok(record)
    }

    async fn touch_last_access(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(mut user) = self.users.get_mut(&id) {
            user.ultimo_accesso = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRememberTokenStore {
    tokens: DashMap<String, RememberToken>,
}

impl MemoryRememberTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl RememberTokenStore for MemoryRememberTokenStore {
    async fn store(&self, token: &RememberToken) -> Result<(), AppError> {
        self.tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RememberToken>, AppError> {
        Ok(self
            .tokens
            .get(token_hash)
            .filter(|t| t.expires_at > now)
            .map(|t| t.value().clone()))
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, AppError> {
        Ok(u64::from(self.tokens.remove(token_hash).is_some()))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at > now);
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: i64,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemorySecurityStore {
    events: Mutex<Vec<NewSecurityEvent>>,
    counters: DashMap<String, Counter>,
}

impl MemorySecurityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<NewSecurityEvent> {
        self.events.lock().await.clone()
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

#[async_trait]
impl SecurityStore for MemorySecurityStore {
    async fn insert_event(&self, event: &NewSecurityEvent) -> Result<(), AppError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn has_event_since(
        &self,
        event_type: SecurityEventType,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .any(|e| e.event_type == event_type && e.ip_address == ip && e.created_at > since))
    }

    async fn hit_counter(
        &self,
        key: &str,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let fresh = Counter {
            count: 1,
            expires_at: now + Duration::seconds(window_secs),
        };

        // entry() 持有分片锁，读改写是原子的
        let count = {
            let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
                count: 0,
                expires_at: fresh.expires_at,
            });
            if entry.count > 0 && entry.expires_at <= now {
                *entry = fresh;
            } else {
                entry.count += 1;
            }
            entry.count
        };

        Ok(count)
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|e| e.created_at >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn delete_expired_counters(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let before = self.counters.len();
        self.counters.retain(|_, c| c.expires_at > now);
        Ok(before.saturating_sub(self.counters.len()) as u64)
    }

    async fn count_by_type(&self, since: DateTime<Utc>) -> Result<Vec<EventTypeCount>, AppError> {
        let events = self.events.lock().await;
        let mut counts: HashMap<&'static str, i64> = HashMap::new();
        for e in events.iter().filter(|e| e.created_at >= since) {
            *counts.entry(e.event_type.as_str()).or_default() += 1;
        }

        let mut rows: Vec<EventTypeCount> = counts
            .into_iter()
            .map(|(event_type, count)| EventTypeCount {
                event_type: event_type.to_string(),
                count,
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.event_type.cmp(&b.event_type)));
        Ok(rows)
    }

    async fn top_ips(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<IpCount>, AppError> {
        let events = self.events.lock().await;
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for e in events.iter().filter(|e| e.created_at >= since) {
            *counts.entry(e.ip_address.as_str()).or_default() += 1;
        }

        let mut rows: Vec<IpCount> = counts
            .into_iter()
            .map(|(ip, count)| IpCount {
                ip_address: ip.to_string(),
                count,
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.ip_address.cmp(&b.ip_address)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, AppError> {
        let events = self.events.lock().await;
        let mut counts: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for e in events.iter().filter(|e| e.created_at >= since) {
            *counts.entry(e.created_at.date_naive()).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(day, count)| DayCount { day, count })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserRole;
    use serde_json::json;

    fn new_user(email: &str, nickname: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            nickname: nickname.to_string(),
            password_hash: "hash".to_string(),
            nome: String::new(),
            cognome: String::new(),
            anno_nascita: None,
            luogo_nascita: None,
            tipo_utente: UserRole::Standard,
        }
    }

    #[tokio::test]
    async fn test_user_uniqueness() {
        let store = MemoryUserStore::new();
        let now = Utc::now();

        let alice = store.create(&new_user("a@x.it", "alice"), now).await.unwrap();
        assert_eq!(alice.id, 1);

        let dup_email = store.create(&new_user("A@X.it", "other"), now).await;
        assert!(matches!(dup_email, Err(AppError::Conflict(f)) if f == "email"));

        let dup_nick = store.create(&new_user("b@x.it", "ALICE"), now).await;
        assert!(matches!(dup_nick, Err(AppError::Conflict(f)) if f == "nickname"));

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_counter_window() {
        let store = MemorySecurityStore::new();
        let now = Utc::now();

        assert_eq!(store.hit_counter("k", 60, now).await.unwrap(), 1);
        assert_eq!(store.hit_counter("k", 60, now).await.unwrap(), 2);
        // 窗口过期后重新计数
        let later = now + Duration::seconds(61);
        assert_eq!(store.hit_counter("k", 60, later).await.unwrap(), 1);

        assert_eq!(store.delete_expired_counters(later).await.unwrap(), 0);
        let much_later = later + Duration::seconds(120);
        assert_eq!(store.delete_expired_counters(much_later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_event_aggregates() {
        let store = MemorySecurityStore::new();
        let now = Utc::now();
        for (kind, ip) in [
            (SecurityEventType::FailedLogin, "198.51.100.1"),
            (SecurityEventType::FailedLogin, "198.51.100.1"),
            (SecurityEventType::CsrfFailure, "198.51.100.2"),
        ] {
            store
                .insert_event(&NewSecurityEvent {
                    event_type: kind,
                    ip_address: ip.to_string(),
                    user_id: None,
                    details: json!({}),
                    created_at: now,
                })
                .await
                .unwrap();
        }

        let since = now - Duration::days(1);
        let by_type = store.count_by_type(since).await.unwrap();
        assert_eq!(by_type[0].event_type, "failed_login");
        assert_eq!(by_type[0].count, 2);

        let ips = store.top_ips(since, 1).await.unwrap();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0].ip_address, "198.51.100.1");

        let days = store.count_by_day(since).await.unwrap();
        assert_eq!(days.iter().map(|d| d.count).sum::<i64>(), 3);

        assert!(store
            .has_event_since(SecurityEventType::CsrfFailure, "198.51.100.2", since)
            .await
            .unwrap());
        assert_eq!(store.delete_events_before(now + Duration::seconds(1)).await.unwrap(), 3);
    }
}
