//! CSRF 令牌的签发与校验

use crate::session::{random_token, Session};
use chrono::{DateTime, Duration, Utc};

/// 请求头名称
pub const CSRF_HEADER: &str = "x-csrf-token";

/// 返回会话中仍有效的令牌，否则签发新令牌
pub fn issue(session: &mut Session, now: DateTime<Utc>, ttl_secs: i64) -> String {
    let data = session.data_mut();
    if let (Some(token), Some(issued)) = (&data.csrf_token, data.csrf_token_time) {
        if now - issued <= Duration::seconds(ttl_secs) {
            return token.clone();
        }
    }

    let token = random_token(32);
    data.csrf_token = Some(token.clone());
    data.csrf_token_time = Some(now);
    token
}

pub fn verify(session: &Session, token: &str, now: DateTime<Utc>, ttl_secs: i64) -> bool {
    let data = session.data();
    let (Some(expected), Some(issued)) = (&data.csrf_token, data.csrf_token_time) else {
        return false;
    };

    if now - issued > Duration::seconds(ttl_secs) {
        return false;
    }

    constant_time_eq(expected, token)
}

/// 长度不同直接返回 false，长度相同时比较耗时与内容无关
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a_bytes.iter().zip(b_bytes) {
        diff |= x ^ y;
    }
    diff == 0
}
