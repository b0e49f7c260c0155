//! 认证相关的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    context::SharedContext,
    error::AuthError,
    middleware::AppState,
    models::{
        auth::{AuthSuccess, LoginRequest, RateLimitStatus},
        security::SecurityEventType,
        user::RegisterRequest,
    },
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// 登出后允许跳转的页面
const REDIRECT_ALLOW_LIST: [&str; 6] = ["home", "login", "register", "projects", "about", "contact"];

/// 签发 CSRF 令牌
pub async fn csrf_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SharedContext>,
) -> impl IntoResponse {
    let mut ctx = ctx.lock().await;
    let token = state.auth_service.generate_csrf_token(&mut ctx);

    Json(json!({ "csrf_token": token }))
}

/// 登录
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SharedContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthSuccess>, AuthError> {
    let mut ctx = ctx.lock().await;
    let success = state.auth_service.login(&mut ctx, &req).await?;

    Ok(Json(success))
}

/// 注册
pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SharedContext>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let mut ctx = ctx.lock().await;
    let success = state.auth_service.register(&mut ctx, &req).await?;

    Ok((StatusCode::CREATED, Json(success)))
}

/// 登出（JSON）
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SharedContext>,
) -> impl IntoResponse {
    let mut ctx = ctx.lock().await;
    state.auth_service.logout(&mut ctx).await;

    Json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
pub struct LogoutRedirectQuery {
    pub redirect: Option<String>,
}

/// 登出并跳转；不在白名单内的目标被忽略并记录
pub async fn logout_redirect(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SharedContext>,
    Query(query): Query<LogoutRedirectQuery>,
) -> Redirect {
    let mut ctx = ctx.lock().await;
    state.auth_service.logout(&mut ctx).await;

    let target = match query.redirect.as_deref().map(str::trim) {
        None | Some("") | Some("home") => "/".to_string(),
        Some(page) if REDIRECT_ALLOW_LIST.contains(&page) => format!("/{page}"),
        Some(page) => {
            tracing::warn!(redirect = %page, "Rejected logout redirect target");
            state
                .security_service
                .log_security_event(
                    &ctx,
                    SecurityEventType::InvalidRedirect,
                    json!({ "redirect": page }),
                    None,
                    None,
                )
                .await;
            "/".to_string()
        }
    };

    Redirect::to(&target)
}

/// 当前登录用户
pub async fn me(auth: AuthContext) -> impl IntoResponse {
    Json(json!({ "success": true, "user": auth.user }))
}

#[derive(Debug, Deserialize)]
pub struct RateLimitQuery {
    pub identifier: String,
}

/// 登录尝试计数状态
pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SharedContext>,
    Query(query): Query<RateLimitQuery>,
) -> Json<RateLimitStatus> {
    let mut ctx = ctx.lock().await;
    Json(
        state
            .auth_service
            .get_rate_limit_status(&mut ctx, &query.identifier),
    )
}
