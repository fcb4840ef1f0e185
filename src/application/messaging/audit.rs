//! Audit trail for completed commands
//!
//! Records go through a bounded broadcast channel. Emitting never waits: when
//! the logger falls behind, the oldest records are dropped and the logger
//! reports how many it missed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::entities::InboundRequest;

/// One successful command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub module: String,
    pub tenant: Option<String>,
    pub actor: String,
    pub channel: Option<String>,
}

impl AuditRecord {
    pub fn for_request(request: &InboundRequest, command: &str, module: &str) -> Self {
        Self {
            id: request.id.clone(),
            timestamp: Utc::now(),
            command: command.to_string(),
            module: module.to_string(),
            tenant: request.tenant.tenant_id.clone(),
            actor: request.actor.id.clone(),
            channel: request.tenant.channel_id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuditSink {
    sender: broadcast::Sender<AuditRecord>,
}

impl AuditSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fire and forget
    pub fn emit(&self, record: AuditRecord) {
        // only fails when nobody is listening
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }

    /// Consume records into the `audit` log target and, optionally, a JSON
    /// lines file.
    pub fn spawn_logger(&self, file: Option<PathBuf>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(record) => {
                        tracing::info!(
                            target: "audit",
                            tenant = record.tenant.as_deref().unwrap_or("dm"),
                            actor = %record.actor,
                            module = %record.module,
                            "/{} executed",
                            record.command
                        );
                        if let Some(path) = &file {
                            if let Err(e) = append_line(path, &record).await {
                                tracing::warn!("Failed to write audit file {}: {}", path.display(), e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "audit", "Audit logger fell behind, dropped {} records", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

async fn append_line(path: &Path, record: &AuditRecord) -> std::io::Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Actor, TenantContext};

    fn record(command: &str) -> AuditRecord {
        let request = InboundRequest::new(command, Actor::new("1"), TenantContext::guild("g"));
        AuditRecord::for_request(&request, command, "Defaults")
    }

    #[tokio::test]
    async fn slow_consumer_loses_oldest_records() {
        let sink = AuditSink::new(2);
        let mut receiver = sink.subscribe();

        for name in ["a", "b", "c", "d"] {
            sink.emit(record(name));
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(receiver.recv().await.unwrap().command, "c");
        assert_eq!(receiver.recv().await.unwrap().command, "d");
    }

    #[test]
    fn emit_without_listeners_is_silent() {
        AuditSink::new(4).emit(record("ping"));
    }

    #[tokio::test]
    async fn logger_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = AuditSink::new(8);
        let handle = sink.spawn_logger(Some(path.clone()));

        sink.emit(record("ping"));
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["command"], "ping");
        assert_eq!(line["tenant"], "g");
    }
}
