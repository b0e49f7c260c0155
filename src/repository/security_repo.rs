//! Security repository (security_events / rate_limits 表)

use super::SecurityStore;
use crate::{
    error::AppError,
    models::security::{DayCount, EventTypeCount, IpCount, NewSecurityEvent, SecurityEventType},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct SecurityRepository {
    db: PgPool,
}

impl SecurityRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SecurityStore for SecurityRepository {
    async fn insert_event(&self, event: &NewSecurityEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO security_events (event_type, ip_address, user_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.event_type.as_str())
        .bind(&event.ip_address)
        .bind(event.user_id)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn has_event_since(
        &self,
        event_type: SecurityEventType,
        ip: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM security_events
                WHERE event_type = $1 AND ip_address = $2 AND created_at > $3
            )
            "#,
        )
        .bind(event_type.as_str())
        .bind(ip)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn hit_counter(
        &self,
        key: &str,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let expires_at = now + chrono::Duration::seconds(window_secs);

        // 单条语句完成"过期重置或递增"，并发请求不会读到旧值
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (identifier, request_count, window_expires_at)
            VALUES ($1, 1, $2)
            ON CONFLICT (identifier) DO UPDATE SET
                request_count = CASE
                    WHEN rate_limits.window_expires_at <= $3 THEN 1
                    ELSE rate_limits.request_count + 1
                END,
                window_expires_at = CASE
                    WHEN rate_limits.window_expires_at <= $3 THEN EXCLUDED.window_expires_at
                    ELSE rate_limits.window_expires_at
                END
            RETURNING request_count
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(i64::from(count))
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM security_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_counters(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_type(&self, since: DateTime<Utc>) -> Result<Vec<EventTypeCount>, AppError> {
        let rows = sqlx::query_as::<_, EventTypeCount>(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM security_events
            WHERE created_at >= $1
            GROUP BY event_type
            ORDER BY count DESC, event_type
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    async fn top_ips(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<IpCount>, AppError> {
        let rows = sqlx::query_as::<_, IpCount>(
            r#"
            SELECT ip_address, COUNT(*) AS count
            FROM security_events
            WHERE created_at >= $1
            GROUP BY ip_address
            ORDER BY count DESC, ip_address
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    async fn count_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>, AppError> {
        let rows = sqlx::query_as::<_, DayCount>(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS count
            FROM security_events
            WHERE created_at >= $1
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}
