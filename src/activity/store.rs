//! 日志存储后端抽象

use super::LogEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    #[error("log store write failed: {0}")]
    Write(String),
}

/// 外部日志存储
#[async_trait]
pub trait LogStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// 连通性探测
    async fn ping(&self) -> Result<(), LogStoreError>;

    /// 批量写入同一集合
    async fn insert_many(&self, collection: &str, entries: &[LogEntry])
        -> Result<(), LogStoreError>;
}

/// 进程内日志存储，可切换可用状态
#[derive(Default)]
pub struct MemoryLogStore {
    offline: AtomicBool,
    collections: Mutex<HashMap<String, Vec<LogEntry>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    pub async fn entries(&self, collection: &str) -> Vec<LogEntry> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn total(&self) -> usize {
        self.collections.lock().await.values().map(Vec::len).sum()
    }

    fn check(&self) -> Result<(), LogStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LogStoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), LogStoreError> {
        self.check()
    }

    async fn insert_many(
        &self,
        collection: &str,
        entries: &[LogEntry],
    ) -> Result<(), LogStoreError> {
        self.check()?;
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }
}
