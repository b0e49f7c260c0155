//! 请求上下文
//! 显式携带客户端信息、会话与待写出的 Cookie

use crate::session::Session;
use axum::http::{header, HeaderMap};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 在中间件与处理器之间共享的上下文
pub type SharedContext = Arc<Mutex<RequestContext>>;

/// 待写出的 Cookie 指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieDirective {
    Set {
        name: String,
        value: String,
        max_age_secs: i64,
        http_only: bool,
    },
    Clear {
        name: String,
    },
}

impl CookieDirective {
    pub fn name(&self) -> &str {
        match self {
            CookieDirective::Set { name, .. } | CookieDirective::Clear { name } => name,
        }
    }

    /// 生成 Set-Cookie 头的值
    pub fn to_header_value(&self, secure: bool) -> String {
        let mut cookie = match self {
            CookieDirective::Set {
                name,
                value,
                max_age_secs,
                http_only,
            } => {
                let mut c = format!("{name}={value}; Path=/; SameSite=Lax; Max-Age={max_age_secs}");
                if *http_only {
                    c.push_str("; HttpOnly");
                }
                c
            }
            CookieDirective::Clear { name } => {
                format!("{name}=; Path=/; SameSite=Lax; Max-Age=0")
            }
        };
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// 解析请求中的 Cookie 头
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug)]
pub struct RequestContext {
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub request_uri: Option<String>,
    pub session: Session,
    cookies_in: HashMap<String, String>,
    cookies_out: Vec<CookieDirective>,
}

impl RequestContext {
    pub fn new(
        client_ip: impl Into<String>,
        user_agent: Option<String>,
        request_uri: Option<String>,
        session: Session,
        cookies_in: HashMap<String, String>,
    ) -> Self {
        Self {
            client_ip: client_ip.into(),
            user_agent,
            request_uri,
            session,
            cookies_in,
            cookies_out: Vec::new(),
        }
    }

    /// 仅含 IP 和新会话的上下文
    pub fn anonymous(client_ip: impl Into<String>) -> Self {
        Self::new(client_ip, None, None, Session::new(), HashMap::new())
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies_in.insert(name.to_string(), value.to_string());
        self
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies_in.get(name).map(String::as_str)
    }

    /// 同名指令只保留最后一次
    pub fn set_cookie(&mut self, name: &str, value: String, max_age_secs: i64, http_only: bool) {
        self.cookies_out.retain(|d| d.name() != name);
        self.cookies_out.push(CookieDirective::Set {
            name: name.to_string(),
            value,
            max_age_secs,
            http_only,
        });
    }

    pub fn clear_cookie(&mut self, name: &str) {
        self.cookies_out.retain(|d| d.name() != name);
        self.cookies_out.push(CookieDirective::Clear {
            name: name.to_string(),
        });
    }

    pub fn cookie_directives(&self) -> &[CookieDirective] {
        &self.cookies_out
    }

    pub fn take_cookie_directives(&mut self) -> Vec<CookieDirective> {
        std::mem::take(&mut self.cookies_out)
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }
}
