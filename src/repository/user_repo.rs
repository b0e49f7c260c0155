//! User repository (utenti 表)

use super::UserStore;
use crate::{
    error::AppError,
    models::user::{NewUser, User},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct UserRepository {
    db: PgPool,
}

impl UserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// 唯一约束冲突转换为 `Conflict`，字段名取自约束名
fn map_unique_violation(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some(c) if c.contains("nickname") => "nickname",
                _ => "email",
            };
            return AppError::Conflict(field.to_string());
        }
    }
    AppError::Database(e)
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM utenti WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM utenti WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM utenti WHERE LOWER(email) = LOWER($1))",
        )
        .bind(email)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn nickname_exists(&self, nickname: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM utenti WHERE LOWER(nickname) = LOWER($1))",
        )
        .bind(nickname)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn create(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO utenti (
                email, nickname, password_hash, nome, cognome, anno_nascita, luogo_nascita,
                tipo_utente, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(&user.password_hash)
        .bind(&user.nome)
        .bind(&user.cognome)
        .bind(user.anno_nascita)
        .bind(&user.luogo_nascita)
        .bind(user.tipo_utente.as_str())
        .bind(now)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)
    }

    async fn touch_last_access(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE utenti SET ultimo_accesso = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
