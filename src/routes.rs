//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{auth::require_auth_middleware, handlers, middleware, middleware::AppState};

/// 请求体上限
const MAX_BODY_BYTES: usize = 64 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 认证路由（无需登录）
    let auth_routes = Router::new()
        .route("/api/auth/csrf", get(handlers::auth::csrf_token))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/rate-limit", get(handlers::auth::rate_limit_status));

    // 需要登录的路由
    let authenticated_routes = Router::new()
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/security/stats", get(handlers::security::security_stats))
        .route_layer(from_fn_with_state(state.clone(), require_auth_middleware));

    let api_routes = Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .layer(from_fn_with_state(state.clone(), middleware::csrf_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::api_rate_limit_middleware,
        ));

    // 页面式登出
    let page_routes = Router::new().route("/logout", get(handlers::auth::logout_redirect));

    // 组合所有路由；layer 越靠后越先执行
    Router::new()
        .merge(api_routes)
        .merge(page_routes)
        .layer(from_fn_with_state(state.clone(), middleware::session_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::ip_block_middleware))
        .merge(public_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(from_fn(middleware::request_tracking_middleware))
        .with_state(state)
}
