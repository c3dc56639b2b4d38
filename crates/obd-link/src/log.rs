//! Rolling transaction log
//!
//! Human-readable `TX:` / `RX:` / `ERR:` lines for display, newest first.
//! This is separate from `tracing` output.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Default number of retained entries
pub const DEFAULT_CAPACITY: usize = 200;

/// Kind of log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Tx,
    Rx,
    Err,
    Diag,
}

impl LogKind {
    fn label(&self) -> &'static str {
        match self {
            LogKind::Tx => "TX",
            LogKind::Rx => "RX",
            LogKind::Err => "ERR",
            LogKind::Diag => "DIAG",
        }
    }
}

/// A single log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub kind: LogKind,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.at.format("%H:%M:%S"), self.kind.label(), self.text)
    }
}

/// Bounded log shared between the queue and observers
#[derive(Debug, Clone)]
pub struct TransactionLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl TransactionLog {
    /// Create a log keeping at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Record a line
    pub fn push(&self, kind: LogKind, text: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_back();
        }
        entries.push_front(LogEntry {
            at: Local::now(),
            kind,
            text: text.into(),
        });
    }

    /// Entries, newest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Formatted lines, newest first
    pub fn lines(&self) -> Vec<String> {
        self.entries().iter().map(LogEntry::to_string).collect()
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
