//! 测试公共模块
//! 基于内存存储和手动时钟构建应用

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response},
};
use bostarter::{
    activity::{ActivityLogger, MemoryLogStore},
    auth::PasswordHasher,
    clock::{Clock, ManualClock},
    config::{
        ActivityBackend, ActivityLogConfig, AppConfig, DatabaseConfig, FailedAttemptPolicy,
        LoggingConfig, SecurityConfig, ServerConfig, SessionConfig, StorageBackend, StorageConfig,
    },
    context::RequestContext,
    middleware::AppState,
    models::user::{RegisterRequest, UserRole},
    repository::{MemoryRememberTokenStore, MemorySecurityStore, MemoryUserStore, Stores},
    session::MemorySessionStore,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use secrecy::Secret;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

pub const CLIENT_IP: &str = "203.0.113.10";

/// 创建测试配置
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            graceful_shutdown_timeout_secs: 5,
        },
        database: DatabaseConfig {
            url: Secret::new("postgresql://localhost/bostarter_test".to_string()),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            attempt_salt: Secret::new("test-attempt-salt-0123456789".to_string()),
            password_min_length: 6,
            password_require_uppercase: false,
            password_require_digit: false,
            failed_attempt_policy: FailedAttemptPolicy::Enforced,
            max_login_attempts: 10,
            login_lockout_secs: 900,
            csrf_token_ttl_secs: 3600,
            csrf_protection: true,
            rate_limit_enabled: true,
            api_rate_limit_max: 1000,
            api_rate_limit_window_secs: 60,
            login_rate_limit_max: 100,
            login_rate_limit_window_secs: 300,
            log_security_events: true,
            block_duration_secs: 3600,
            block_cache_ttl_secs: 300,
            event_retention_days: 30,
            trust_proxy: true,
        },
        session: SessionConfig {
            cookie_name: "BOSTARTER_SESSID".to_string(),
            cookie_secure: false,
            lifetime_secs: 1800,
            regenerate_after_secs: 300,
            remember_days: 30,
        },
        activity_log: ActivityLogConfig {
            backend: ActivityBackend::None,
            mongo_uri: Secret::new("mongodb://localhost:27017".to_string()),
            mongo_database: "bostarter_test".to_string(),
            connect_timeout_secs: 1,
            server_selection_timeout_secs: 1,
            file_path: "logs/test-activity.log".to_string(),
            batch_size: 1,
            flush_interval_secs: 10,
            retry_after_secs: 60,
        },
    }
}

/// 内存版应用及其可检查的存储
pub struct TestApp {
    pub state: Arc<AppState>,
    pub clock: ManualClock,
    pub users: Arc<MemoryUserStore>,
    pub remember_tokens: Arc<MemoryRememberTokenStore>,
    pub security: Arc<MemorySecurityStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub log_store: Arc<MemoryLogStore>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(create_test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let users = Arc::new(MemoryUserStore::new());
        let remember_tokens = Arc::new(MemoryRememberTokenStore::new());
        let security = Arc::new(MemorySecurityStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let log_store = Arc::new(MemoryLogStore::new());

        let stores = Stores {
            users: users.clone(),
            remember_tokens: remember_tokens.clone(),
            security: security.clone(),
            sessions: sessions.clone(),
        };

        let logger = Arc::new(
            ActivityLogger::new(
                Some(log_store.clone()),
                None,
                config.activity_log.batch_size,
                config.activity_log.retry_after_secs,
                shared_clock.clone(),
            )
            .await,
        );

        let state = Arc::new(AppState::new(
            Arc::new(config),
            stores,
            None,
            logger,
            fast_hasher(),
            shared_clock,
        ));

        Self {
            state,
            clock,
            users,
            remember_tokens,
            security,
            sessions,
            log_store,
        }
    }

    /// 新的匿名请求上下文
    pub fn ctx(&self) -> RequestContext {
        RequestContext::anonymous(CLIENT_IP)
    }

    pub fn router(&self) -> axum::Router {
        bostarter::routes::create_router(self.state.clone())
    }
}

/// 低成本参数，只用于测试
pub fn fast_hasher() -> PasswordHasher {
    PasswordHasher::with_params(1024, 1, 1)
}

pub fn register_request(email: &str, nickname: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        nickname: nickname.to_string(),
        password: password.to_string(),
        nome: "Alice".to_string(),
        cognome: "Rossi".to_string(),
        anno_nascita: Some(1995),
        luogo_nascita: Some("Bologna".to_string()),
        tipo_utente: Some(UserRole::Standard),
    }
}

/// 读取 JSON 响应体
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// 响应中全部 Set-Cookie 头
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// 取出指定 Cookie 的值（`name=value` 部分）
pub fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response).into_iter().find_map(|c| {
        let pair = c.split(';').next()?;
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// 保存 Cookie 与 CSRF 令牌的简易客户端
pub struct Browser {
    app: axum::Router,
    cookies: HashMap<String, String>,
    pub csrf_token: Option<String>,
    pub client_ip: String,
}

impl Browser {
    pub fn new(app: axum::Router) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
            csrf_token: None,
            client_ip: CLIENT_IP.to_string(),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub async fn get(&mut self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn send(
        &mut self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", &self.client_ip);

        if !self.cookies.is_empty() {
            let cookie_header = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie_header);
        }
        if let Some(token) = &self.csrf_token {
            builder = builder.header("x-csrf-token", token);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();

        for cookie in set_cookies(&response) {
            let Some((name, value)) = cookie.split(';').next().and_then(|p| p.split_once('=')) else {
                continue;
            };
            if cookie.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }

        response
    }

    /// 获取并保存 CSRF 令牌
    pub async fn fetch_csrf(&mut self) -> String {
        let response = self.get("/api/auth/csrf").await;
        let json = body_json(response).await;
        let token = json["csrf_token"].as_str().unwrap().to_string();
        self.csrf_token = Some(token.clone());
        token
    }
}
