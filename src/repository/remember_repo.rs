//! Remember-token repository (remember_tokens 表)

use super::RememberTokenStore;
use crate::{error::AppError, models::auth::RememberToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct RememberTokenRepository {
    db: PgPool,
}

impl RememberTokenRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RememberTokenStore for RememberTokenRepository {
    async fn store(&self, token: &RememberToken) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO remember_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RememberToken>, AppError> {
        let token = sqlx::query_as::<_, RememberToken>(
            r#"
            SELECT user_id, token_hash, expires_at
            FROM remember_tokens
            WHERE token_hash = $1 AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(token)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM remember_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM remember_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
