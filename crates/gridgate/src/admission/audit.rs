use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use crate::common::time::EpochMillis;

/// Name of the log that receives one record per accepted request.
pub const AUDIT_LOG_NAME: &str = "requests";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ip: String,
    pub time: EpochMillis,
}

/// Receives a record for every accepted request. Inserting never waits for the write.
pub trait AuditSink {
    fn insert(&self, record: AuditRecord);
}

/// Only logs the records.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn insert(&self, record: AuditRecord) {
        log::debug!(
            "Audit [{AUDIT_LOG_NAME}]: request from {} at {}",
            record.ip,
            record.time
        );
    }
}

/// Appends records as JSON lines to a file from a background task.
pub struct FileAuditSink {
    sender: UnboundedSender<AuditRecord>,
}

impl FileAuditSink {
    pub fn start(path: PathBuf) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = unbounded_channel();
        let handle = tokio::spawn(write_records(path, receiver));
        (Self { sender }, handle)
    }
}

impl AuditSink for FileAuditSink {
    fn insert(&self, record: AuditRecord) {
        if self.sender.send(record).is_err() {
            log::error!("Audit writer has stopped, a record was dropped");
        }
    }
}

async fn append_record(path: &Path, record: &AuditRecord) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

async fn write_records(path: PathBuf, mut receiver: UnboundedReceiver<AuditRecord>) {
    while let Some(record) = receiver.recv().await {
        if let Err(error) = append_record(&path, &record).await {
            log::error!(
                "Cannot write audit record into {}: {error:?}",
                path.display()
            );
        }
    }
    log::debug!("Audit writer finished");
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{AuditRecord, AuditSink, FileAuditSink};

    #[tokio::test]
    async fn file_sink_appends_json_lines() {
        let dir = TempDir::with_prefix("gridgate").unwrap();
        let path = dir.path().join("audit.jsonl");
        let (sink, handle) = FileAuditSink::start(path.clone());
        sink.insert(AuditRecord {
            ip: "1.2.3.4".to_string(),
            time: 10,
        });
        sink.insert(AuditRecord {
            ip: "5.6.7.8".to_string(),
            time: 20,
        });
        drop(sink);
        handle.await.unwrap();

        let records: Vec<AuditRecord> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ip, "1.2.3.4");
        assert_eq!(records[1].time, 20);
    }
}
