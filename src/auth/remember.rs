//! 记住我 Cookie 的编解码

use crate::models::auth::RememberCookie;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

pub const REMEMBER_COOKIE: &str = "bostarter_remember";

/// 登出时一并清除的偏好 Cookie
pub const PREFERENCE_COOKIES: [&str; 3] = ["bostarter_prefs", "bostarter_theme", "bostarter_lang"];

/// JSON 再做 base64url，保证是合法的 Cookie 值
pub fn encode_cookie(cookie: &RememberCookie) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(cookie)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_cookie(raw: &str) -> Option<RememberCookie> {
    let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// 数据库中只保存令牌哈希
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
