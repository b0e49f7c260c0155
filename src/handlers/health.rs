//! 健康检查处理器
//! 提供 /health 和 /ready 端点

use axum::{extract::State, http::StatusCode, Json};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{db, middleware::AppState};

/// 存活探针响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// 就绪探针响应
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: Vec<HealthCheck>,
}

/// 健康检查项
#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

static APP_START_TIME: OnceCell<Instant> = OnceCell::new();

/// 记录应用启动时间（main 中调用）
pub fn set_start_time() {
    APP_START_TIME.get_or_init(Instant::now);
}

pub fn get_uptime() -> u64 {
    APP_START_TIME
        .get()
        .map_or(0, |start| start.elapsed().as_secs())
}

/// 存活探针，不检查依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: get_uptime(),
    })
}

/// 就绪探针
/// 数据库不可用时返回 503；活动日志回退到文件只标记为 degraded
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut checks = Vec::new();

    match &state.db {
        Some(pool) => {
            let db_health = db::health_check(pool).await;
            checks.push(HealthCheck {
                name: "database".to_string(),
                status: match &db_health {
                    db::HealthStatus::Healthy => "healthy".to_string(),
                    db::HealthStatus::Unhealthy(_) => "unhealthy".to_string(),
                },
                message: match db_health {
                    db::HealthStatus::Healthy => None,
                    db::HealthStatus::Unhealthy(msg) => Some(msg),
                },
            });
        }
        None => checks.push(HealthCheck {
            name: "database".to_string(),
            status: "healthy".to_string(),
            message: Some("in-memory storage".to_string()),
        }),
    }

    let store_available = state.activity_logger.is_store_available();
    checks.push(HealthCheck {
        name: "activity_log".to_string(),
        status: if store_available { "healthy" } else { "degraded" }.to_string(),
        message: (!store_available).then(|| "writing to fallback file".to_string()),
    });

    let ready = checks.iter().all(|c| c.status != "unhealthy");
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, checks }))
}
