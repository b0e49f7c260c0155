//! 会话认证中间件

use crate::{
    context::SharedContext, error::AppError, middleware::AppState, models::user::UserSnapshot,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: UserSnapshot,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 会话认证中间件 - 必须已登录
pub async fn require_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let shared = req
        .extensions()
        .get::<SharedContext>()
        .cloned()
        .ok_or(AppError::Unauthorized)?;

    let user = {
        let mut ctx = shared.lock().await;
        if !state.auth_service.is_authenticated(&mut ctx).await {
            return Err(AppError::Unauthorized);
        }
        state
            .auth_service
            .current_user(&ctx)
            .ok_or(AppError::Unauthorized)?
    };

    req.extensions_mut().insert(AuthContext { user });

    Ok(next.run(req).await)
}
