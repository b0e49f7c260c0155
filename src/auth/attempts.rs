//! 会话级登录尝试计数
//! 计数键为 SHA-256(盐 ‖ 标识 ‖ 客户端 IP)
//!
//! 计数保存在会话中，丢弃会话 Cookie 即可重新开始；
//! 跨会话的约束由 `AuthService::login` 中按 IP 的 `login:` 限流提供。

use crate::{
    config::{FailedAttemptPolicy, SecurityConfig},
    models::auth::RateLimitStatus,
    session::{AttemptCounter, Session},
};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct AttemptTracker {
    salt: Secret<String>,
    policy: FailedAttemptPolicy,
    max_attempts: u32,
    lockout: Duration,
}

impl AttemptTracker {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            salt: config.attempt_salt.clone(),
            policy: config.failed_attempt_policy,
            max_attempts: config.max_login_attempts,
            lockout: Duration::seconds(config.login_lockout_secs as i64),
        }
    }

    pub fn key(&self, identifier: &str, client_ip: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.expose_secret().as_bytes());
        hasher.update(identifier.trim().to_lowercase().as_bytes());
        hasher.update(client_ip.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// 读取状态；过期的锁定或计数窗口会被清除
    pub fn status(&self, session: &mut Session, key: &str, now: DateTime<Utc>) -> RateLimitStatus {
        let attempts = &mut session.data_mut().login_attempts;

        let expired = attempts.get(key).is_some_and(|counter| match counter.locked_until {
            Some(until) => until <= now,
            None => now - counter.first_attempt > self.lockout,
        });
        if expired {
            attempts.remove(key);
        }

        self.describe(attempts.get(key), now)
    }

    /// 记录一次失败；禁用策略下不做任何事
    pub fn record_failure(
        &self,
        session: &mut Session,
        key: &str,
        now: DateTime<Utc>,
    ) -> RateLimitStatus {
        if self.policy == FailedAttemptPolicy::Disabled {
            return self.status(session, key, now);
        }

        // 先清理过期记录
        self.status(session, key, now);

        let attempts = &mut session.data_mut().login_attempts;
        let counter = attempts.entry(key.to_string()).or_insert(AttemptCounter {
            count: 0,
            first_attempt: now,
            locked_until: None,
        });
        counter.count += 1;
        if counter.count >= self.max_attempts && counter.locked_until.is_none() {
            counter.locked_until = Some(now + self.lockout);
        }

        self.describe(attempts.get(key), now)
    }

    pub fn reset(&self, session: &mut Session, key: &str) {
        session.data_mut().login_attempts.remove(key);
    }

    fn describe(&self, counter: Option<&AttemptCounter>, now: DateTime<Utc>) -> RateLimitStatus {
        match counter {
            Some(counter) => {
                let lockout_expires_at = counter.locked_until.filter(|until| *until > now);
                RateLimitStatus {
                    blocked: lockout_expires_at.is_some(),
                    attempts: counter.count,
                    remaining_attempts: self.max_attempts.saturating_sub(counter.count),
                    lockout_expires_at,
                }
            }
            None => RateLimitStatus {
                blocked: false,
                attempts: 0,
                remaining_attempts: self.max_attempts,
                lockout_expires_at: None,
            },
        }
    }
}
