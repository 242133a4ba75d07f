//! Task / Controls. Every long-running operation in the engine is wrapped
//! in one of these so the orchestrator can cancel, pause and report on it
//! uniformly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Download,
    Upload,
    Forward,
    Monitor,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Set-once boolean latch, safe to clone and poll from many tasks.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Event latch that suspends callers cooperatively while paused. Unlike
/// `CancelToken` this toggles back and forth.
#[derive(Clone)]
pub struct PauseToken {
    paused: Arc<AtomicBool>,
    resumed: Arc<Notify>,
}

impl Default for PauseToken {
    fn default() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            resumed: Arc::new(Notify::new()),
        }
    }
}

impl PauseToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Suspends the caller while paused. Called at every yield point (top
    /// of per-group and per-file loops). Bounds each
    /// wait so a `resume()` landing between the `is_paused` check and the
    /// `notified()` subscription (a lost wakeup) self-heals instead of
    /// hanging forever.
    pub async fn wait_if_paused(&self) {
        const POLL: std::time::Duration = std::time::Duration::from_millis(200);
        while self.is_paused() {
            let notified = self.resumed.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(POLL) => {}
            }
        }
    }
}

/// One unit of orchestrator-tracked work.
pub struct Task {
    pub id: u64,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// In `[0, 1]`.
    pub progress: f32,
    pub cancel: CancelToken,
    pub pause: PauseToken,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Task {
    pub fn new(id: u64, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Pending,
            progress: 0.0,
            cancel: CancelToken::new(),
            pause: PauseToken::new(),
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves to a new status, enforcing that terminal states are final.
    pub fn transition(&mut self, next: TaskStatus) {
        if self.status.is_terminal() {
            return;
        }
        if next == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(chrono::Utc::now());
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_transitions_are_final() {
        let mut task = Task::new(1, TaskKind::Forward);
        task.transition(TaskStatus::Running);
        task.transition(TaskStatus::Failed);
        assert_eq!(task.status, TaskStatus::Failed);
        task.transition(TaskStatus::Running);
        assert_eq!(task.status, TaskStatus::Failed, "terminal state must stick");
    }
}
