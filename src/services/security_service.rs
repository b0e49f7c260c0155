//! 安全服务：请求限流、IP 封禁、安全事件记录与统计
//!
//! 所有方法在内部出错时返回安全的默认值，错误只记录日志，不向调用方传播。

use crate::{
    activity::{ActivityLogger, LogContext},
    clock::Clock,
    config::SecurityConfig,
    context::RequestContext,
    models::security::{CleanupReport, NewSecurityEvent, SecurityEventType, SecurityStats},
    repository::SecurityStore,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;

/// 统计报表中的 IP 数量
const TOP_IPS_LIMIT: i64 = 10;
/// 统计天数上限
const MAX_STATS_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy)]
struct CachedBlock {
    blocked: bool,
    cached_at: DateTime<Utc>,
}

pub struct SecurityService {
    store: Arc<dyn SecurityStore>,
    logger: Arc<ActivityLogger>,
    config: SecurityConfig,
    clock: Arc<dyn Clock>,
    block_cache: DashMap<String, CachedBlock>,
}

impl SecurityService {
    pub fn new(
        store: Arc<dyn SecurityStore>,
        logger: Arc<ActivityLogger>,
        config: SecurityConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            logger,
            config,
            clock,
            block_cache: DashMap::new(),
        }
    }

    /// 优先读缓存，未命中时查询最近的 ip_blocked 事件
    pub async fn is_ip_blocked(&self, ip: &str) -> bool {
        let now = self.clock.now();
        let ttl = Duration::seconds(self.config.block_cache_ttl_secs);

        if let Some(cached) = self.block_cache.get(ip).map(|c| *c) {
            if now - cached.cached_at < ttl {
                return cached.blocked;
            }
        }

        let since = now - Duration::seconds(self.config.block_duration_secs);
        match self
            .store
            .has_event_since(SecurityEventType::IpBlocked, ip, since)
            .await
        {
            Ok(blocked) => {
                self.block_cache.insert(
                    ip.to_string(),
                    CachedBlock {
                        blocked,
                        cached_at: now,
                    },
                );
                blocked
            }
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "Failed to check IP block status");
                false
            }
        }
    }

    /// 固定窗口计数；超过上限返回 false。关闭或出错时放行
    pub async fn check_request_limit(
        &self,
        ctx: &RequestContext,
        key: &str,
        max_requests: i64,
        window_secs: i64,
    ) -> bool {
        if !self.config.rate_limit_enabled {
            return true;
        }

        let now = self.clock.now();
        let count = match self.store.hit_counter(key, window_secs, now).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Rate limit check failed, allowing request");
                return true;
            }
        };

        if count <= max_requests {
            return true;
        }

        metrics::counter!("rate_limit_rejections_total").increment(1);
        tracing::warn!(
            key = %key,
            count = count,
            max_requests = max_requests,
            "Rate limit exceeded"
        );
        self.log_security_event(
            ctx,
            SecurityEventType::RateLimitExceeded,
            json!({
                "key": key,
                "count": count,
                "max_requests": max_requests,
                "window_secs": window_secs,
            }),
            None,
            None,
        )
        .await;

        false
    }

    /// 写入 ip_blocked 事件并使缓存失效
    pub async fn block_ip(&self, ctx: &RequestContext, ip: &str, reason: &str, extra: Value) -> bool {
        let mut details = json!({ "reason": reason });
        if let (Value::Object(map), Value::Object(extra)) = (&mut details, extra) {
            map.extend(extra);
        }

        let event = NewSecurityEvent {
            event_type: SecurityEventType::IpBlocked,
            ip_address: ip.to_string(),
            user_id: ctx.session.data().user_id,
            details: details.clone(),
            created_at: self.clock.now(),
        };

        let stored = match self.store.insert_event(&event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "Failed to block IP");
                false
            }
        };
        self.block_cache.remove(ip);

        if stored {
            tracing::warn!(ip = %ip, reason = %reason, "IP blocked");
            self.logger
                .log_security(&LogContext::from(ctx), SecurityEventType::IpBlocked.as_str(), details)
                .await;
        }

        stored
    }

    /// 记录安全事件；IP 默认取上下文中的客户端 IP，用户默认取会话用户
    pub async fn log_security_event(
        &self,
        ctx: &RequestContext,
        kind: SecurityEventType,
        details: Value,
        ip: Option<&str>,
        user_id: Option<i64>,
    ) -> bool {
        if !self.config.log_security_events {
            return false;
        }

        let event = NewSecurityEvent {
            event_type: kind,
            ip_address: ip.unwrap_or(&ctx.client_ip).to_string(),
            user_id: user_id.or(ctx.session.data().user_id),
            details,
            created_at: self.clock.now(),
        };

        metrics::counter!("security_events_total", "type" => kind.as_str()).increment(1);

        if let Err(e) = self.store.insert_event(&event).await {
            tracing::error!(event_type = kind.as_str(), error = %e, "Failed to record security event");
            return false;
        }

        let mut log_ctx = LogContext::from(ctx);
        log_ctx.ip_address = Some(event.ip_address.clone());
        log_ctx.user_id = event.user_id;
        self.logger
            .log_security(&log_ctx, kind.as_str(), event.details)
            .await;

        true
    }

    /// 删除过期的安全事件与限流计数
    pub async fn cleanup_old_data(&self) -> CleanupReport {
        let now = self.clock.now();
        let cutoff = now - Duration::days(self.config.event_retention_days);

        let security_events_deleted = self
            .store
            .delete_events_before(cutoff)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to delete old security events");
                0
            });

        let rate_limits_deleted = self
            .store
            .delete_expired_counters(now)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to delete expired rate limits");
                0
            });

        let ttl = Duration::seconds(self.config.block_cache_ttl_secs);
        self.block_cache.retain(|_, cached| now - cached.cached_at < ttl);

        tracing::info!(
            security_events_deleted,
            rate_limits_deleted,
            "Security data cleanup completed"
        );

        CleanupReport {
            security_events_deleted,
            rate_limits_deleted,
        }
    }

    /// 最近 `days` 天的事件统计
    pub async fn get_security_stats(&self, days: i64) -> SecurityStats {
        let days = days.clamp(1, MAX_STATS_DAYS);
        let since = self.clock.now() - Duration::days(days);

        let by_type = self.store.count_by_type(since).await;
        let top_ips = self.store.top_ips(since, TOP_IPS_LIMIT).await;
        let by_day = self.store.count_by_day(since).await;

        match (by_type, top_ips, by_day) {
            (Ok(by_type), Ok(top_ips), Ok(by_day)) => SecurityStats {
                days,
                by_type,
                top_ips,
                by_day,
            },
            (by_type, top_ips, by_day) => {
                for e in [by_type.err(), top_ips.err(), by_day.err()].into_iter().flatten() {
                    tracing::error!(error = %e, "Failed to load security stats");
                }
                SecurityStats {
                    days,
                    ..SecurityStats::default()
                }
            }
        }
    }
}
