//! 本地回退文件（每行一个 JSON 对象）

use super::LogEntry;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(entries: &[LogEntry]) -> std::io::Result<String> {
        let mut out = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    pub async fn append(&self, entries: &[LogEntry]) -> std::io::Result<()> {
        let payload = Self::render(entries)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(payload.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// 同步写入，用于析构时
    pub fn append_blocking(&self, entries: &[LogEntry]) -> std::io::Result<()> {
        let payload = Self::render(entries)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(payload.as_bytes())?;

        Ok(())
    }
}
