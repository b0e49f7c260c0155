//! User domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 用户记录（utenti 表）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub nome: String,
    pub cognome: String,
    pub anno_nascita: Option<i32>,
    pub luogo_nascita: Option<String>,
    /// standard, creatore, amministratore
    pub tipo_utente: String,
    pub ultimo_accesso: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// User role enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Standard,
    Creatore,
    Amministratore,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Standard => "standard",
            UserRole::Creatore => "creatore",
            UserRole::Amministratore => "amministratore",
        }
    }
}

impl From<&str> for UserRole {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "creatore" => UserRole::Creatore,
            "amministratore" => UserRole::Amministratore,
            _ => UserRole::Standard,
        }
    }
}

/// 待插入的新用户
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub nickname: String,
    pub password_hash: String,
    pub nome: String,
    pub cognome: String,
    pub anno_nascita: Option<i32>,
    pub luogo_nascita: Option<String>,
    pub tipo_utente: UserRole,
}

/// 会话中保存的用户快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSnapshot {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    pub role: UserRole,
    pub nome: String,
    pub cognome: String,
}

impl From<&User> for UserSnapshot {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            role: UserRole::from(user.tipo_utente.as_str()),
            nome: user.nome.clone(),
            cognome: user.cognome.clone(),
        }
    }
}

/// Registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Email non valida"))]
    pub email: String,
    #[validate(length(min = 3, max = 30, message = "Il nickname deve avere tra 3 e 30 caratteri"))]
    pub nickname: String,
    pub password: String,
    #[serde(default)]
    #[validate(length(max = 100, message = "Nome troppo lungo"))]
    pub nome: String,
    #[serde(default)]
    #[validate(length(max = 100, message = "Cognome troppo lungo"))]
    pub cognome: String,
    #[validate(range(min = 1900, max = 2100, message = "Anno di nascita non valido"))]
    pub anno_nascita: Option<i32>,
    #[validate(length(max = 100, message = "Luogo di nascita troppo lungo"))]
    pub luogo_nascita: Option<String>,
    pub tipo_utente: Option<UserRole>,
}

impl RegisterRequest {
    /// 去除首尾空白的副本（密码除外）；校验与写入都基于它
    pub fn normalized(&self) -> Self {
        Self {
            email: self.email.trim().to_string(),
            nickname: self.nickname.trim().to_string(),
            password: self.password.clone(),
            nome: self.nome.trim().to_string(),
            cognome: self.cognome.trim().to_string(),
            anno_nascita: self.anno_nascita,
            luogo_nascita: self
                .luogo_nascita
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            tipo_utente: self.tipo_utente,
        }
    }
}
