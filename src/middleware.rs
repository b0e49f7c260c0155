//! HTTP 中间件
//! 请求追踪、IP 封禁、会话加载与保存、API 限流、CSRF 校验

use crate::{
    activity::ActivityLogger,
    auth::{csrf::CSRF_HEADER, PasswordHasher},
    clock::Clock,
    config::AppConfig,
    context::{parse_cookies, RequestContext, SharedContext},
    error::AppError,
    models::security::SecurityEventType,
    repository::Stores,
    services::{AuthService, SecurityService},
    session::{Session, SessionStore},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 服务都用 Arc 包装，按请求克隆的只是指针。
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// 内存存储模式下为 None
    pub db: Option<sqlx::PgPool>,
    pub clock: Arc<dyn Clock>,
    pub sessions: Arc<dyn SessionStore>,
    pub auth_service: Arc<AuthService>,
    pub security_service: Arc<SecurityService>,
    pub activity_logger: Arc<ActivityLogger>,
}

impl AppState {
    /// 按配置装配各个服务
    pub fn new(
        config: Arc<AppConfig>,
        stores: Stores,
        db: Option<sqlx::PgPool>,
        activity_logger: Arc<ActivityLogger>,
        hasher: PasswordHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let security_service = Arc::new(SecurityService::new(
            stores.security.clone(),
            activity_logger.clone(),
            config.security.clone(),
            clock.clone(),
        ));

        let auth_service = Arc::new(AuthService::new(
            stores.users.clone(),
            stores.remember_tokens.clone(),
            security_service.clone(),
            activity_logger.clone(),
            hasher,
            config.clone(),
            clock.clone(),
        ));

        Self {
            config,
            db,
            clock,
            sessions: stores.sessions,
            auth_service,
            security_service,
            activity_logger,
        }
    }
}

/// 已解析的客户端 IP（请求扩展）
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        // 标签只用静态字符串
        let method_name = match method {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::PATCH => "PATCH",
            _ => "OTHER",
        };
        let status_class = match status {
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 被封禁的 IP 直接返回 403
pub async fn ip_block_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client_ip = client_ip_of(&req, state.config.security.trust_proxy);

    if state.security_service.is_ip_blocked(&client_ip).await {
        tracing::warn!(client_ip = %client_ip, "Request from blocked IP rejected");
        return Err(AppError::Forbidden);
    }

    req.extensions_mut().insert(ClientIp(client_ip));
    Ok(next.run(req).await)
}

/// 加载会话、构建请求上下文；处理完成后保存会话并写出 Cookie
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let session_config = &state.config.session;
    let cookies = parse_cookies(req.headers());
    let incoming_id = cookies.get(&session_config.cookie_name).cloned();

    let session = match &incoming_id {
        Some(id) => match state.sessions.load(id).await {
            Ok(Some(data)) => Session::restore(id.clone(), data),
            Ok(None) => Session::new(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load session");
                Session::new()
            }
        },
        None => Session::new(),
    };

    let client_ip = match req.extensions().get::<ClientIp>() {
        Some(ClientIp(ip)) => ip.clone(),
        None => client_ip_of(&req, state.config.security.trust_proxy),
    };
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let request_uri = Some(req.uri().to_string());

    let shared =
        RequestContext::new(client_ip, user_agent, request_uri, session, cookies).into_shared();
    {
        let mut ctx = shared.lock().await;
        state.auth_service.resume_from_remember_token(&mut ctx).await;
    }

    req.extensions_mut().insert(shared.clone());
    let mut response = next.run(req).await;

    let mut ctx = shared.lock().await;
    if let Err(e) = state.sessions.save(&mut ctx.session, state.clock.now()).await {
        tracing::error!(error = %e, "Failed to save session");
    }

    if !ctx.session.data().is_empty() {
        let id = ctx.session.id().to_string();
        ctx.set_cookie(&session_config.cookie_name, id, session_config.lifetime_secs, true);
    } else if incoming_id.is_some() {
        ctx.clear_cookie(&session_config.cookie_name);
    }

    for directive in ctx.take_cookie_directives() {
        match HeaderValue::from_str(&directive.to_header_value(session_config.cookie_secure)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => {
                tracing::error!(cookie = directive.name(), error = %e, "Invalid cookie value");
            }
        }
    }

    response
}

/// 全局 API 限流（按客户端 IP）
pub async fn api_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(shared) = req.extensions().get::<SharedContext>().cloned() else {
        return Ok(next.run(req).await);
    };

    let allowed = {
        let ctx = shared.lock().await;
        let key = format!("api:{}", ctx.client_ip);
        state
            .security_service
            .check_request_limit(
                &ctx,
                &key,
                state.config.security.api_rate_limit_max,
                state.config.security.api_rate_limit_window_secs,
            )
            .await
    };

    if !allowed {
        return Err(AppError::RateLimitExceeded);
    }

    Ok(next.run(req).await)
}

/// 变更类请求必须携带有效的 CSRF 令牌
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let mutating = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if !mutating || !state.config.security.csrf_protection {
        return Ok(next.run(req).await);
    }

    let shared = req
        .extensions()
        .get::<SharedContext>()
        .cloned()
        .ok_or(AppError::Forbidden)?;
    let token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    {
        let ctx = shared.lock().await;
        if !state.auth_service.verify_csrf_token(&ctx, &token) {
            tracing::warn!(client_ip = %ctx.client_ip, path = %req.uri().path(), "CSRF check failed");
            state
                .security_service
                .log_security_event(
                    &ctx,
                    SecurityEventType::CsrfFailure,
                    json!({ "path": req.uri().path(), "method": req.method().as_str() }),
                    None,
                    None,
                )
                .await;
            return Err(AppError::Forbidden);
        }
    }

    Ok(next.run(req).await)
}

/// 依次尝试代理头，只接受公网地址
const PROXY_HEADERS: [&str; 6] = [
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
    "forwarded",
];

fn client_ip_of(req: &Request, trust_proxy: bool) -> String {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    resolve_client_ip(req.headers(), remote, trust_proxy)
}

/// 解析客户端 IP，代理头都不可用时回退到连接地址
pub fn resolve_client_ip(headers: &HeaderMap, remote: Option<IpAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        for name in PROXY_HEADERS {
            let Some(raw) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            if let Some(ip) = raw.split(',').filter_map(parse_forwarded_ip).find(is_public_ip) {
                return ip.to_string();
            }
        }
    }

    remote
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 支持 `1.2.3.4`、`1.2.3.4:80`、`[::1]:80` 以及 `for="…"` 形式
fn parse_forwarded_ip(part: &str) -> Option<IpAddr> {
    let mut value = part.trim();
    if let Some(rest) = value.split(';').map(str::trim).find_map(|p| {
        p.get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("for="))
            .and_then(|_| p.get(4..))
    }) {
        value = rest;
    }
    let value = value.trim_matches('"');

    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

/// 排除私有、回环、链路本地与保留地址
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let first = v4.octets()[0];
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || first == 0
                || first >= 240)
        }
        IpAddr::V6(v6) => {
            let head = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (head & 0xfe00) == 0xfc00
                || (head & 0xffc0) == 0xfe80)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_or_generate_trace_id(&headers);
        assert_eq!(trace_id, "test-trace-123");

        let headers = HeaderMap::new();
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!trace_id.is_empty());
        assert_ne!(trace_id, "test-trace-123");
    }

    #[test]
    fn test_resolve_client_ip_skips_private_ranges() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 203.0.113.9".parse().unwrap());

        let remote = Some("192.168.1.10".parse().unwrap());
        assert_eq!(resolve_client_ip(&headers, remote, true), "203.0.113.9");
        // 不信任代理时只看连接地址
        assert_eq!(resolve_client_ip(&headers, remote, false), "192.168.1.10");
    }

    #[test]
    fn test_resolve_client_ip_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("forwarded", "for=\"198.51.100.7:4711\";proto=https".parse().unwrap());
        assert_eq!(resolve_client_ip(&headers, None, true), "198.51.100.7");

        let mut headers = HeaderMap::new();
        headers.insert("client-ip", "127.0.0.1".parse().unwrap());
        assert_eq!(resolve_client_ip(&headers, None, true), "unknown");
    }

    #[test]
    fn test_is_public_ip() {
        assert!(is_public_ip(&"8.8.8.8".parse().unwrap()));
        assert!(!is_public_ip(&"172.16.0.1".parse().unwrap()));
        assert!(!is_public_ip(&"169.254.1.1".parse().unwrap()));
        assert!(!is_public_ip(&"fd00::1".parse().unwrap()));
        assert!(is_public_ip(&"2001:db8::1".parse().unwrap()));
    }
}
