//! File-backed command and module logs (JSON lines).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::traits::CommandLog;
use crate::types::{CommandLogRecord, ModuleLogRecord};

/// Appends one JSON object per line to a pair of log files.
pub struct FileCommandLog {
    command_path: PathBuf,
    module_path: PathBuf,
}

impl FileCommandLog {
    pub fn new(command_path: impl Into<PathBuf>, module_path: impl Into<PathBuf>) -> Self {
        Self {
            command_path: command_path.into(),
            module_path: module_path.into(),
        }
    }

    async fn append_line(path: &Path, line: String) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(format!("create log dir: {}", e)))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::storage(format!("open log {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::storage(format!("append log: {}", e)))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| Error::storage(format!("append log: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl CommandLog for FileCommandLog {
    async fn append_command(&self, record: CommandLogRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        Self::append_line(&self.command_path, line).await
    }

    async fn append_module(&self, record: ModuleLogRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        Self::append_line(&self.module_path, line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceChannel;

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileCommandLog::new(dir.path().join("cmd.jsonl"), dir.path().join("mod.jsonl"));

        log.append_command(CommandLogRecord::new(
            "status",
            "111",
            SourceChannel::Sms,
            true,
            3,
            None,
        ))
        .await
        .unwrap();
        log.append_module(ModuleLogRecord::new("weather", "loaded", "sha256 abc"))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("cmd.jsonl"))
            .await
            .unwrap();
        assert_eq!(content.lines().count(), 1);
        let parsed: CommandLogRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.action, "status");
        assert!(parsed.success);
    }
}
