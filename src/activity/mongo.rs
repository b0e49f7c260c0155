//! MongoDB 日志存储

use super::{LogEntry, LogStore, LogStoreError};
use crate::config::ActivityLogConfig;
use async_trait::async_trait;
use mongodb::{
    bson::doc,
    options::{ClientOptions, WriteConcern},
    Client, Database,
};
use secrecy::ExposeSecret;
use std::time::Duration;

pub struct MongoLogStore {
    db: Database,
}

impl MongoLogStore {
    /// 建立客户端；不会立即连接，连通性由 `ping` 确认
    pub async fn connect(config: &ActivityLogConfig) -> Result<Self, LogStoreError> {
        let mut options = ClientOptions::parse(config.mongo_uri.expose_secret())
            .await
            .map_err(|e| LogStoreError::Unavailable(e.to_string()))?;

        options.app_name = Some("bostarter".to_string());
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        options.server_selection_timeout =
            Some(Duration::from_secs(config.server_selection_timeout_secs));
        options.write_concern = Some(WriteConcern::majority());

        let client =
            Client::with_options(options).map_err(|e| LogStoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            db: client.database(&config.mongo_database),
        })
    }
}

#[async_trait]
impl LogStore for MongoLogStore {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<(), LogStoreError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| LogStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        entries: &[LogEntry],
    ) -> Result<(), LogStoreError> {
        self.db
            .collection::<LogEntry>(collection)
            .insert_many(entries)
            .await
            .map_err(|e| LogStoreError::Write(e.to_string()))?;
        Ok(())
    }
}
