//! 安全统计处理器（仅管理员）

use crate::{
    auth::middleware::AuthContext, error::AppError, middleware::AppState,
    models::{security::SecurityStats, user::UserRole},
};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

pub async fn security_stats(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<StatsQuery>,
) -> Result<Json<SecurityStats>, AppError> {
    if auth.user.role != UserRole::Amministratore {
        return Err(AppError::Forbidden);
    }

    let stats = state
        .security_service
        .get_security_stats(query.days.unwrap_or(7))
        .await;

    Ok(Json(stats))
}
