use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::Level;
use serde::Serialize;

use crate::paxos::NodeId;

/// Destination for per-node log lines. Each node gets its sink injected at
/// construction instead of reaching for a process-wide logger.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, node: NodeId, message: &str);
}

/// Forwards everything to the `log` facade under the `paxos::node` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn log(&self, level: Level, node: NodeId, message: &str) {
        log::log!(target: "paxos::node", level, "Node {}: {}", node, message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub offset: u64,
    pub node: NodeId,
    pub level: String,
    pub message: String,
}

/// Keeps every line in memory with an incrementing offset, and optionally
/// forwards to another sink as well.
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
    next_offset: AtomicU64,
    forward: Option<Arc<dyn LogSink>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            entries: Mutex::new(Vec::new()),
            next_offset: AtomicU64::new(0),
            forward: None,
        }
    }

    /// Record in memory and also pass every line on to `sink`.
    pub fn forwarding(sink: Arc<dyn LogSink>) -> Self {
        MemorySink {
            forward: Some(sink),
            ..MemorySink::new()
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn entries_for(&self, node: NodeId) -> Vec<LogEntry> {
        self.lock().iter().filter(|e| e.node == node).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        // A panic while pushing cannot leave the vector half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        MemorySink::new()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, node: NodeId, message: &str) {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.lock().push(LogEntry {
            offset,
            node,
            level: level.to_string(),
            message: message.to_string(),
        });
        if let Some(forward) = &self.forward {
            forward.log(level, node, message);
        }
    }
}

/// A sink bound to one node.
#[derive(Clone)]
pub struct NodeLogger {
    node: NodeId,
    sink: Arc<dyn LogSink>,
}

impl NodeLogger {
    pub fn new(node: NodeId, sink: Arc<dyn LogSink>) -> Self {
        NodeLogger { node, sink }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.sink.log(Level::Debug, self.node, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.sink.log(Level::Info, self.node, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.sink.log(Level::Warn, self.node, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.sink.log(Level::Error, self.node, msg.as_ref());
    }
}

impl std::fmt::Debug for NodeLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLogger").field("node", &self.node).finish()
    }
}
