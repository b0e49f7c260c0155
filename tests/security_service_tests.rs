//! 安全服务集成测试

use bostarter::models::security::SecurityEventType;
use serde_json::json;

mod common;
use common::{create_test_config, TestApp};

#[tokio::test]
async fn test_request_limit_window() {
    let app = TestApp::new().await;
    let security = &app.state.security_service;
    let ctx = app.ctx();

    for _ in 0..5 {
        assert!(security.check_request_limit(&ctx, "search:ip", 5, 60).await);
    }
    // 第 N+1 次被拒绝
    assert!(!security.check_request_limit(&ctx, "search:ip", 5, 60).await);
    assert!(!security.check_request_limit(&ctx, "search:ip", 5, 60).await);

    // 其他键互不影响
    assert!(security.check_request_limit(&ctx, "other", 5, 60).await);

    // 窗口过期后重新计数
    app.clock.advance(61);
    assert!(security.check_request_limit(&ctx, "search:ip", 5, 60).await);

    let events = app.security.events().await;
    let exceeded: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == SecurityEventType::RateLimitExceeded)
        .collect();
    assert_eq!(exceeded.len(), 2);
    assert_eq!(exceeded[0].ip_address, common::CLIENT_IP);
    assert_eq!(exceeded[0].details["key"], "search:ip");
}

#[tokio::test]
async fn test_request_limit_disabled_fails_open() {
    let mut config = create_test_config();
    config.security.rate_limit_enabled = false;
    let app = TestApp::with_config(config).await;
    let ctx = app.ctx();

    for _ in 0..20 {
        assert!(app.state.security_service.check_request_limit(&ctx, "k", 1, 60).await);
    }
    assert_eq!(app.security.counter_count(), 0);
}

#[tokio::test]
async fn test_block_ip_and_cache() {
    let app = TestApp::new().await;
    let security = &app.state.security_service;
    let ctx = app.ctx();
    let ip = "198.51.100.23";

    assert!(!security.is_ip_blocked(ip).await);

    assert!(security
        .block_ip(&ctx, ip, "brute force", json!({ "failed_logins": 50 }))
        .await);
    // block_ip 使缓存失效，立即生效
    assert!(security.is_ip_blocked(ip).await);
    assert!(!security.is_ip_blocked(common::CLIENT_IP).await);

    let events = app.security.events().await;
    let blocked = events
        .iter()
        .find(|e| e.event_type == SecurityEventType::IpBlocked)
        .unwrap();
    assert_eq!(blocked.details["reason"], "brute force");
    assert_eq!(blocked.details["failed_logins"], 50);

    // 封禁到期后，缓存过期即解除
    app.clock.advance(3601);
    assert!(!security.is_ip_blocked(ip).await);
}

#[tokio::test]
async fn test_block_status_is_cached() {
    let app = TestApp::new().await;
    let security = &app.state.security_service;
    let ip = "198.51.100.24";

    assert!(!security.is_ip_blocked(ip).await);

    // 绕过服务直接写入事件，缓存期内仍返回旧值
    security
        .log_security_event(&app.ctx(), SecurityEventType::IpBlocked, json!({}), Some(ip), None)
        .await;
    assert!(!security.is_ip_blocked(ip).await);

    app.clock.advance(301);
    assert!(security.is_ip_blocked(ip).await);
}

#[tokio::test]
async fn test_log_security_event_defaults_and_toggle() {
    let app = TestApp::new().await;
    let security = &app.state.security_service;

    assert!(security
        .log_security_event(&app.ctx(), SecurityEventType::CsrfFailure, json!({"path": "/x"}), None, None)
        .await);
    assert!(security
        .log_security_event(
            &app.ctx(),
            SecurityEventType::InvalidRedirect,
            json!({}),
            Some("198.51.100.1"),
            Some(42),
        )
        .await);

    let events = app.security.events().await;
    assert_eq!(events[0].ip_address, common::CLIENT_IP);
    assert_eq!(events[0].user_id, None);
    assert_eq!(events[1].ip_address, "198.51.100.1");
    assert_eq!(events[1].user_id, Some(42));

    // 安全事件也写入活动日志
    let logged = app.log_store.entries(bostarter::activity::SECURITY).await;
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].action, "csrf_failure");

    let mut config = create_test_config();
    config.security.log_security_events = false;
    let quiet = TestApp::with_config(config).await;
    assert!(!quiet
        .state
        .security_service
        .log_security_event(&quiet.ctx(), SecurityEventType::CsrfFailure, json!({}), None, None)
        .await);
    assert!(quiet.security.events().await.is_empty());
}

#[tokio::test]
async fn test_cleanup_and_stats() {
    let app = TestApp::new().await;
    let security = &app.state.security_service;
    let ctx = app.ctx();

    security
        .log_security_event(&ctx, SecurityEventType::FailedLogin, json!({}), Some("198.51.100.1"), None)
        .await;
    assert!(security.check_request_limit(&ctx, "k", 10, 60).await);

    app.clock.advance(31 * 24 * 3600);

    for ip in ["198.51.100.2", "198.51.100.2", "198.51.100.3"] {
        security
            .log_security_event(&ctx, SecurityEventType::FailedLogin, json!({}), Some(ip), None)
            .await;
    }
    security
        .log_security_event(&ctx, SecurityEventType::CsrfFailure, json!({}), Some("198.51.100.3"), None)
        .await;

    let stats = security.get_security_stats(7).await;
    assert_eq!(stats.days, 7);
    assert_eq!(stats.by_type[0].event_type, "failed_login");
    assert_eq!(stats.by_type[0].count, 3);
    assert_eq!(stats.top_ips[0].ip_address, "198.51.100.2");
    assert_eq!(stats.top_ips.len(), 2);
    assert_eq!(stats.by_day.iter().map(|d| d.count).sum::<i64>(), 4);

    let report = security.cleanup_old_data().await;
    assert_eq!(report.security_events_deleted, 1);
    assert_eq!(report.rate_limits_deleted, 1);
    assert_eq!(app.security.events().await.len(), 4);

    // 天数被限制在合理范围内
    assert_eq!(security.get_security_stats(0).await.days, 1);
    assert_eq!(security.get_security_stats(10_000).await.days, 365);
}
