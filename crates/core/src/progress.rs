//! Ambient progress reporting (C13): an optional sink a host can attach to
//! observe a sync pass without coupling the core to any particular UI.

use serde::{Deserialize, Serialize};

/// A snapshot of how far the current phase has gotten. Fields are `Option`
/// because not every phase knows a total up front (e.g. remote listing).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub phase: String,
    pub entries_total: Option<u64>,
    pub entries_done: Option<u64>,
    pub bytes_pushed: Option<u64>,
    pub bytes_pulled: Option<u64>,
    pub bytes_reused: Option<u64>,
    pub deleted: Option<u64>,
}

impl TaskProgress {
    pub fn phase(name: &str) -> Self {
        Self {
            phase: name.to_string(),
            ..Default::default()
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: TaskProgress);
}

/// A sink that drops everything. The default when no host is attached.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _progress: TaskProgress) {}
}
