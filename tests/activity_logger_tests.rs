//! 活动日志故障转移测试

use bostarter::{
    activity::{
        ActivityLogger, FileSink, FlushOutcome, LogContext, LogEntry, MemoryLogStore, LogStore,
        ERRORS, USER_ACTIONS,
    },
    clock::{Clock, ManualClock},
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn read_lines(path: &Path) -> Vec<LogEntry> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn user_ctx() -> LogContext {
    LogContext {
        user_id: Some(7),
        ip_address: Some("203.0.113.10".to_string()),
        user_agent: Some("test-agent".to_string()),
        request_uri: Some("/api/auth/login".to_string()),
    }
}

async fn logger_with(
    store: &Arc<MemoryLogStore>,
    path: &Path,
    batch_size: usize,
    clock: &ManualClock,
) -> ActivityLogger {
    let store: Arc<dyn LogStore> = store.clone();
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    ActivityLogger::new(Some(store), Some(FileSink::new(path)), batch_size, 60, clock).await
}

#[tokio::test]
async fn test_failover_to_file_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("activity.log");
    let clock = ManualClock::default();

    let store = Arc::new(MemoryLogStore::new());
    store.set_available(false);
    let logger = logger_with(&store, &path, 1, &clock).await;
    assert!(!logger.is_store_available());

    // 存储不可用：调用仍成功，条目写入回退文件
    assert!(logger.log_user_action(&user_ctx(), "login", json!({"ok": true})).await);

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].action, "login");
    assert_eq!(lines[0].collection, USER_ACTIONS);
    assert_eq!(lines[0].user_id, Some(7));
    assert_eq!(lines[0].user_agent.as_deref(), Some("test-agent"));

    // 存储恢复，但重试间隔未到，仍写文件
    store.set_available(true);
    assert!(logger.log_user_action(&user_ctx(), "view", json!({})).await);
    assert_eq!(read_lines(&path).len(), 2);
    assert_eq!(store.total().await, 0);

    // 过了重试间隔后重新探测，后续条目写入存储
    clock.advance(61);
    assert!(logger.log_user_action(&user_ctx(), "logout", json!({})).await);
    assert!(logger.is_store_available());
    assert_eq!(read_lines(&path).len(), 2);
    assert_eq!(store.entries(USER_ACTIONS).await[0].action, "logout");
}

#[tokio::test]
async fn test_store_failure_mid_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("activity.log");
    let clock = ManualClock::default();

    let store = Arc::new(MemoryLogStore::new());
    let logger = logger_with(&store, &path, 10, &clock).await;
    assert!(logger.is_store_available());

    logger.log_user_action(&user_ctx(), "a", json!({})).await;
    assert_eq!(logger.flush_buffer().await, FlushOutcome::Store(1));

    store.set_available(false);
    logger.log_user_action(&user_ctx(), "b", json!({})).await;
    logger.log_error(&user_ctx(), "boom", json!({"code": 500})).await;

    assert_eq!(logger.flush_buffer().await, FlushOutcome::File(2));
    assert!(!logger.is_store_available());

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|e| e.collection == ERRORS && e.action == "boom"));
    assert_eq!(logger.buffered().await, 0);
}

#[tokio::test]
async fn test_buffer_flushes_at_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("activity.log");
    let clock = ManualClock::default();

    let store = Arc::new(MemoryLogStore::new());
    let logger = logger_with(&store, &path, 100, &clock).await;

    for i in 0..99 {
        logger.log_user_action(&user_ctx(), &format!("action-{i}"), json!({})).await;
    }
    assert_eq!(store.total().await, 0);
    assert_eq!(logger.buffered().await, 99);

    logger.log_user_action(&user_ctx(), "action-99", json!({})).await;
    assert_eq!(store.total().await, 100);
    assert_eq!(logger.buffered().await, 0);
}

#[tokio::test]
async fn test_flush_buffer_to_file_directly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("dir").join("activity.log");
    let clock = ManualClock::default();

    let store = Arc::new(MemoryLogStore::new());
    let logger = logger_with(&store, &path, 100, &clock).await;

    logger.log_user_action(&user_ctx(), "a", json!({})).await;
    logger.log_user_action(&user_ctx(), "b", json!({})).await;

    assert_eq!(logger.flush_buffer_to_file().await, FlushOutcome::File(2));
    assert_eq!(read_lines(&path).len(), 2);
    assert_eq!(logger.flush_buffer_to_file().await, FlushOutcome::Empty);
    assert_eq!(store.total().await, 0);
}

#[tokio::test]
async fn test_drop_flushes_remaining_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("activity.log");
    let clock = ManualClock::default();

    let store = Arc::new(MemoryLogStore::new());
    let logger = logger_with(&store, &path, 100, &clock).await;
    for action in ["a", "b", "c"] {
        logger.log_user_action(&user_ctx(), action, json!({})).await;
    }
    drop(logger);

    let actions: Vec<String> = read_lines(&path).into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_unwritable_file_keeps_entries_buffered() {
    let dir = tempfile::tempdir().unwrap();
    // 父路径是普通文件，无法创建目录
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let path = blocker.join("activity.log");
    let clock = ManualClock::default();

    let store = Arc::new(MemoryLogStore::new());
    store.set_available(false);
    let logger = logger_with(&store, &path, 10, &clock).await;

    assert!(logger.log_user_action(&user_ctx(), "a", json!({})).await);
    assert_eq!(logger.flush_buffer().await, FlushOutcome::Failed(1));
    assert_eq!(logger.buffered().await, 1);

    // 存储恢复后，保留的条目写入存储
    store.set_available(true);
    clock.advance(61);
    assert_eq!(logger.flush_buffer().await, FlushOutcome::Store(1));
    assert_eq!(logger.buffered().await, 0);
}
