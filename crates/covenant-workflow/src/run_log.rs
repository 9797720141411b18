use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use covenant_core::error::Result;
use covenant_core::event::WorkflowEvent;

/// JSONL event logger.
///
/// Each workflow gets `{log_dir}/{workflow_id}/{timestamp}.jsonl`, one event
/// per line. Append-only, so a crash leaves every earlier line intact.
pub struct RunLogger {
    log_dir: PathBuf,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    workflow_id: &'a str,
    event: &'a WorkflowEvent,
}

impl RunLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// Create the log file for a workflow.
    pub async fn open(&self, workflow_id: &str) -> Result<RunLog> {
        let dir = self.log_dir.join(workflow_id);
        tokio::fs::create_dir_all(&dir).await?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let path = dir.join(format!("{}.jsonl", timestamp));

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "Run log opened");

        Ok(RunLog {
            writer: tokio::io::BufWriter::new(file),
            workflow_id: workflow_id.to_string(),
            path,
            lines: 0,
        })
    }

    /// Drain `events`, handing each one to `forward` and appending it to the
    /// log of the workflow announced by its `workflow_start`.
    ///
    /// Log failures are only logged. An error from `forward` stops the drain
    /// and is returned. Returns the number of lines written.
    pub async fn record<S, F>(&self, mut events: S, mut forward: F) -> Result<usize>
    where
        S: Stream<Item = WorkflowEvent> + Unpin,
        F: FnMut(&WorkflowEvent) -> Result<()>,
    {
        let mut log: Option<RunLog> = None;
        let mut opened = false;

        while let Some(event) = events.next().await {
            if !opened {
                if let WorkflowEvent::WorkflowStart { workflow_id, .. } = &event {
                    opened = true;
                    match self.open(workflow_id).await {
                        Ok(l) => log = Some(l),
                        Err(e) => warn!(error = %e, "Run log unavailable"),
                    }
                }
            }
            if let Some(l) = log.as_mut() {
                l.append(&event).await;
            }
            if let Err(e) = forward(&event) {
                if let Some(l) = log {
                    l.close().await;
                }
                return Err(e);
            }
        }

        Ok(match log {
            Some(l) => l.close().await,
            None => 0,
        })
    }
}

/// Open JSONL file for one workflow.
pub struct RunLog {
    writer: tokio::io::BufWriter<tokio::fs::File>,
    workflow_id: String,
    path: PathBuf,
    lines: usize,
}

impl RunLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Write failures are logged, never returned.
    pub async fn append(&mut self, event: &WorkflowEvent) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            workflow_id: &self.workflow_id,
            event,
        };
        let mut line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "Failed to serialize log entry");
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            error!(error = %e, path = %self.path.display(), "Failed to write log entry");
            return;
        }
        self.lines += 1;
    }

    /// Flush and close. Returns the number of lines written.
    pub async fn close(mut self) -> usize {
        if let Err(e) = self.writer.flush().await {
            error!(error = %e, path = %self.path.display(), "Failed to flush run log");
        }
        debug!(lines = self.lines, path = %self.path.display(), "Run log closed");
        self.lines
    }
}
