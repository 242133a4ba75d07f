//! Progress reporting: a small callback interface every task reports
//! through, independent of whatever renders it (terminal, log, or nothing
//! in tests).

pub trait ProgressSink: Send + Sync {
    fn status(&self, msg: &str);
    fn progress(&self, current: u64, total: u64, msg: &str);
    fn error(&self, title: &str, msg: &str, detail: &str, recoverable: bool);
    fn complete(&self, ok: bool, stats: &str);
}

/// Sink that only logs via `tracing`, used wherever no interactive terminal
/// is attached (monitor, non-TTY runs).
pub struct TracingProgressSink {
    pub label: String,
}

impl ProgressSink for TracingProgressSink {
    fn status(&self, msg: &str) {
        tracing::info!(task = %self.label, "{msg}");
    }

    fn progress(&self, current: u64, total: u64, msg: &str) {
        tracing::info!(task = %self.label, current, total, "{msg}");
    }

    fn error(&self, title: &str, msg: &str, detail: &str, recoverable: bool) {
        tracing::error!(task = %self.label, title, recoverable, "{msg}: {detail}");
    }

    fn complete(&self, ok: bool, stats: &str) {
        if ok {
            tracing::info!(task = %self.label, "{stats}");
        } else {
            tracing::warn!(task = %self.label, "{stats}");
        }
    }
}
