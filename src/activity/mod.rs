//! 活动日志
//!
//! 条目先进入内存缓冲，按批写入外部存储；存储不可用时写入本地 JSON 行文件。
//! 记录日志的调用方永远不会因为日志失败而失败。

pub mod file;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod store;

pub use file::FileSink;
pub use store::{LogStore, LogStoreError, MemoryLogStore};

use crate::{
    clock::Clock,
    config::{ActivityBackend, ActivityLogConfig},
    context::RequestContext,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

pub const USER_ACTIONS: &str = "user_actions";
pub const ERRORS: &str = "errors";
pub const PERFORMANCE: &str = "performance";
pub const SECURITY: &str = "security";

/// 持续写入失败时缓冲区保留的批次数
const MAX_BUFFERED_BATCHES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub collection: String,
    pub level: LogLevel,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_uri: Option<String>,
    pub action: String,
    pub data: Value,
}

/// 条目的上下文字段
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_uri: Option<String>,
}

impl From<&RequestContext> for LogContext {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            user_id: ctx.session.data().user_id,
            ip_address: Some(ctx.client_ip.clone()),
            user_agent: ctx.user_agent.clone(),
            request_uri: ctx.request_uri.clone(),
        }
    }
}

/// 一次刷新的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Store(usize),
    File(usize),
    /// 外部存储写入部分成功，其余写入文件
    Split { store: usize, file: usize },
    /// 文件也写入失败，条目留在缓冲区
    Failed(usize),
    /// 日志已关闭
    Discarded(usize),
}

struct StoreHealth {
    available: AtomicBool,
    last_probe: StdMutex<DateTime<Utc>>,
}

pub struct ActivityLogger {
    store: Option<Arc<dyn LogStore>>,
    health: StoreHealth,
    buffer: Mutex<Vec<LogEntry>>,
    sink: Option<FileSink>,
    batch_size: usize,
    retry_after: Duration,
    clock: Arc<dyn Clock>,
}

impl ActivityLogger {
    /// 构造时探测外部存储，失败则回退到文件
    pub async fn new(
        store: Option<Arc<dyn LogStore>>,
        sink: Option<FileSink>,
        batch_size: usize,
        retry_after_secs: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let available = match &store {
            Some(store) => match store.ping().await {
                Ok(()) => {
                    tracing::info!(backend = store.name(), "Activity log store connected");
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        backend = store.name(),
                        error = %e,
                        "Activity log store unavailable, falling back to file"
                    );
                    false
                }
            },
            None => false,
        };

        Self {
            store,
            health: StoreHealth {
                available: AtomicBool::new(available),
                last_probe: StdMutex::new(now),
            },
            buffer: Mutex::new(Vec::new()),
            sink,
            batch_size: batch_size.max(1),
            retry_after: Duration::seconds(retry_after_secs.max(0)),
            clock,
        }
    }

    pub async fn from_config(config: &ActivityLogConfig, clock: Arc<dyn Clock>) -> Self {
        let sink = match config.backend {
            ActivityBackend::None => None,
            _ => Some(FileSink::new(&config.file_path)),
        };

        let store = match config.backend {
            ActivityBackend::Mongo => Self::connect_store(config).await,
            ActivityBackend::File | ActivityBackend::None => None,
        };

        Self::new(
            store,
            sink,
            config.batch_size,
            config.retry_after_secs,
            clock,
        )
        .await
    }

    #[cfg(feature = "mongo")]
    async fn connect_store(config: &ActivityLogConfig) -> Option<Arc<dyn LogStore>> {
        match mongo::MongoLogStore::connect(config).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create MongoDB client");
                None
            }
        }
    }

    #[cfg(not(feature = "mongo"))]
    async fn connect_store(_config: &ActivityLogConfig) -> Option<Arc<dyn LogStore>> {
        tracing::warn!("Built without the `mongo` feature, activity log uses the file backend");
        None
    }

    pub fn is_store_available(&self) -> bool {
        self.store.is_some() && self.health.available.load(Ordering::SeqCst)
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    fn entry(
        &self,
        collection: &str,
        level: LogLevel,
        ctx: &LogContext,
        action: &str,
        data: Value,
    ) -> LogEntry {
        LogEntry {
            timestamp: self.clock.now(),
            collection: collection.to_string(),
            level,
            user_id: ctx.user_id,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            request_uri: ctx.request_uri.clone(),
            action: action.to_string(),
            data,
        }
    }

    pub async fn log_user_action(&self, ctx: &LogContext, action: &str, data: Value) -> bool {
        let entry = self.entry(USER_ACTIONS, LogLevel::Info, ctx, action, data);
        self.log(USER_ACTIONS, entry).await
    }

    pub async fn log_error(&self, ctx: &LogContext, message: &str, data: Value) -> bool {
        let entry = self.entry(ERRORS, LogLevel::Error, ctx, message, data);
        self.log(ERRORS, entry).await
    }

    pub async fn log_performance(
        &self,
        ctx: &LogContext,
        operation: &str,
        duration_ms: f64,
        mut data: Value,
    ) -> bool {
        if let Value::Object(map) = &mut data {
            map.insert("duration_ms".to_string(), Value::from(duration_ms));
        } else {
            data = serde_json::json!({ "duration_ms": duration_ms, "extra": data });
        }
        let entry = self.entry(PERFORMANCE, LogLevel::Info, ctx, operation, data);
        self.log(PERFORMANCE, entry).await
    }

    pub async fn log_security(&self, ctx: &LogContext, event: &str, data: Value) -> bool {
        let entry = self.entry(SECURITY, LogLevel::Warning, ctx, event, data);
        self.log(SECURITY, entry).await
    }

    /// 追加到缓冲区，满一批时刷新。始终返回 true
    pub async fn log(&self, collection: &str, mut entry: LogEntry) -> bool {
        entry.collection = collection.to_string();

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(entry);

            let cap = self.batch_size * MAX_BUFFERED_BATCHES;
            if buffer.len() > cap {
                let overflow = buffer.len() - cap;
                buffer.drain(..overflow);
                tracing::error!(dropped = overflow, "Activity log buffer overflow");
            }

            buffer.len() >= self.batch_size
        };

        if should_flush {
            self.flush_buffer().await;
        }

        true
    }

    /// 存储可用且已过重试间隔时重新探测
    async fn usable_store(&self) -> Option<&Arc<dyn LogStore>> {
        let store = self.store.as_ref()?;
        if self.health.available.load(Ordering::SeqCst) {
            return Some(store);
        }

        let now = self.clock.now();
        {
            let mut last_probe = self
                .health
                .last_probe
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if now - *last_probe < self.retry_after {
                return None;
            }
            *last_probe = now;
        }

        match store.ping().await {
            Ok(()) => {
                tracing::info!(backend = store.name(), "Activity log store recovered");
                self.health.available.store(true, Ordering::SeqCst);
                Some(store)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Activity log store still unavailable");
                None
            }
        }
    }

    fn mark_unavailable(&self) {
        self.health.available.store(false, Ordering::SeqCst);
        let mut last_probe = self
            .health
            .last_probe
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last_probe = self.clock.now();
    }

    pub async fn flush_buffer(&self) -> FlushOutcome {
        let entries = std::mem::take(&mut *self.buffer.lock().await);
        if entries.is_empty() {
            return FlushOutcome::Empty;
        }

        let total = entries.len();
        let Some(store) = self.usable_store().await else {
            return self.write_file(entries).await;
        };

        let mut grouped: BTreeMap<String, Vec<LogEntry>> = BTreeMap::new();
        for entry in entries {
            grouped.entry(entry.collection.clone()).or_default().push(entry);
        }

        let mut stored = 0;
        let mut pending = Vec::new();
        for (collection, batch) in grouped {
            if !pending.is_empty() {
                pending.extend(batch);
                continue;
            }
            match store.insert_many(&collection, &batch).await {
                Ok(()) => stored += batch.len(),
                Err(e) => {
                    tracing::warn!(
                        backend = store.name(),
                        collection = %collection,
                        error = %e,
                        "Activity log store write failed, switching to file"
                    );
                    self.mark_unavailable();
                    pending.extend(batch);
                }
            }
        }

        if pending.is_empty() {
            return FlushOutcome::Store(total);
        }

        match self.write_file(pending).await {
            FlushOutcome::File(file) if stored > 0 => FlushOutcome::Split {
                store: stored,
                file,
            },
            other => other,
        }
    }

    /// 把缓冲区全部写入本地文件
    pub async fn flush_buffer_to_file(&self) -> FlushOutcome {
        let entries = std::mem::take(&mut *self.buffer.lock().await);
        if entries.is_empty() {
            return FlushOutcome::Empty;
        }
        self.write_file(entries).await
    }

    async fn write_file(&self, entries: Vec<LogEntry>) -> FlushOutcome {
        let count = entries.len();
        let Some(sink) = &self.sink else {
            return FlushOutcome::Discarded(count);
        };

        match sink.append(&entries).await {
            Ok(()) => FlushOutcome::File(count),
            Err(e) => {
                tracing::error!(
                    path = %sink.path().display(),
                    error = %e,
                    entries = count,
                    "Failed to write activity log file"
                );
                // 放回缓冲区头部，等待下次刷新
                let mut buffer = self.buffer.lock().await;
                let newer = std::mem::replace(&mut *buffer, entries);
                buffer.extend(newer);
                FlushOutcome::Failed(count)
            }
        }
    }

    pub async fn shutdown(&self) {
        let outcome = self.flush_buffer().await;
        tracing::info!(?outcome, "Activity logger flushed");
    }
}

impl Drop for ActivityLogger {
    fn drop(&mut self) {
        let entries = std::mem::take(self.buffer.get_mut());
        if entries.is_empty() {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.append_blocking(&entries) {
            tracing::error!(error = %e, entries = entries.len(), "Activity log lost on drop");
        }
    }
}
