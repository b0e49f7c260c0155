//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Autenticazione richiesta".to_string(),
            AppError::Forbidden => "Accesso negato".to_string(),
            AppError::NotFound(msg) => format!("Risorsa non trovata: {}", msg),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::RateLimitExceeded => "Troppe richieste, riprova più tardi".to_string(),
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Errore interno del server".to_string()
            }
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    pub fn internal_error(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }

    /// 唯一约束冲突（PostgreSQL 23505）
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("23505")
            }
            AppError::Conflict(_) => true,
            _ => false,
        }
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 记录错误日志
        tracing::error!(
            code = self.code(),
            message = %self,
            request_id = %error_response.error.request_id,
            "Application error"
        );

        (status, Json(error_response)).into_response()
    }
}

/// 从 String 转换为 AppError::Config
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Config(s)
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 认证流程错误
///
/// 认证服务的所有公开方法都以此类型作为边界，内部错误一律折叠为 `Internal`。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("validation failed")]
    Validation(Vec<String>),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    DuplicateEmail,

    #[error("nickname already taken")]
    DuplicateNickname,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("blocked for {retry_after_secs}s")]
    Blocked { retry_after_secs: i64 },

    #[error("internal error")]
    Internal,
}

impl AuthError {
    /// 面向用户的本地化消息列表
    pub fn messages(&self) -> Vec<String> {
        match self {
            AuthError::Validation(errors) => errors.clone(),
            AuthError::InvalidCredentials => vec!["Email o password non corretti".to_string()],
            AuthError::DuplicateEmail => vec!["Email già registrata".to_string()],
            AuthError::DuplicateNickname => vec!["Nickname già in uso".to_string()],
            AuthError::RateLimitExceeded => {
                vec!["Troppe richieste, riprova più tardi".to_string()]
            }
            AuthError::Blocked { retry_after_secs } => {
                let minutes = (retry_after_secs + 59) / 60;
                vec![format!(
                    "Troppi tentativi di accesso. Riprova tra {} minuti",
                    minutes.max(1)
                )]
            }
            AuthError::Internal => vec!["Errore interno del server".to_string()],
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::DuplicateEmail | AuthError::DuplicateNickname => StatusCode::CONFLICT,
            AuthError::RateLimitExceeded | AuthError::Blocked { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "errors": self.messages(),
        });

        (status, Json(body)).into_response()
    }
}
