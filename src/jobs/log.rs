//! Per-execution append-only log.
//!
//! Lines are buffered in memory so status pollers can tail a running job,
//! and forwarded to an optional [`JobStore`] for durability. A failing store
//! never fails the job: the log flips to degraded mode and keeps buffering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_LOG_LINES;
use crate::store::JobStore;

/// One timestamped log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Position within the execution's log, starting at 0.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub message: String,
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%Y-%m-%d %H:%M:%S%.3f"), self.message)
    }
}

#[derive(Debug, Default)]
struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_seq: u64,
    dropped: u64,
}

/// Append-only log for one execution.
pub struct JobLog {
    execution_id: Uuid,
    buffer: RwLock<LogBuffer>,
    store: Option<Arc<dyn JobStore>>,
    degraded: AtomicBool,
    max_lines: usize,
}

impl JobLog {
    /// Create a memory-only log.
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            buffer: RwLock::new(LogBuffer::default()),
            store: None,
            degraded: AtomicBool::new(false),
            max_lines: DEFAULT_MAX_LOG_LINES,
        }
    }

    /// Forward every appended line to a durable store.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cap the number of lines kept in memory.
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    /// Append a line. Never fails.
    pub async fn append(&self, message: impl Into<String>) {
        let line = {
            let mut buffer = self.buffer.write().await;
            let line = LogLine {
                seq: buffer.next_seq,
                at: Utc::now(),
                message: message.into(),
            };
            buffer.next_seq += 1;
            buffer.lines.push_back(line.clone());
            while buffer.lines.len() > self.max_lines {
                buffer.lines.pop_front();
                buffer.dropped += 1;
            }
            line
        };

        debug!(execution_id = %self.execution_id, seq = line.seq, "{}", line.message);

        if let Some(ref store) = self.store
            && let Err(e) = store.append_log(self.execution_id, &line).await
        {
            if !self.degraded.swap(true, Ordering::Relaxed) {
                warn!(
                    execution_id = %self.execution_id,
                    "Job log store unavailable, buffering in memory: {}", e
                );
            }
        }
    }

    /// Snapshot of the buffered lines, oldest first.
    pub async fn lines(&self) -> Vec<LogLine> {
        self.buffer.read().await.lines.iter().cloned().collect()
    }

    /// Number of lines evicted because of the in-memory cap.
    pub async fn dropped(&self) -> u64 {
        self.buffer.read().await.dropped
    }

    /// Whether forwarding to the store has failed at least once.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}
