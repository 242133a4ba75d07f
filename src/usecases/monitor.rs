//! Real-time monitor and its real-time media-group collector. Subscribes
//! to incoming-message events per source, debounces album members into
//! groups, and feeds them into the same `Pipeline` machinery historical
//! runs use.

use crate::domain::{CancelToken, ChannelRef, DomainError, Message, PairPolicy, PauseToken};
use crate::ports::TgGateway;
use crate::usecases::collector::CollectedGroup;
use crate::usecases::pipeline::{Pipeline, PipelineStats};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(1);
const PROCESSED_EVICT_AT: usize = 1000;
const PROCESSED_KEEP: usize = 500;

/// Identifies one monitor instance so re-starting an identical one is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorIdentity {
    pub source_canonical: String,
    pub sorted_targets: Vec<String>,
}

impl MonitorIdentity {
    pub fn new(source_canonical: &str, mut targets: Vec<String>) -> Self {
        targets.sort();
        Self {
            source_canonical: source_canonical.to_string(),
            sorted_targets: targets,
        }
    }
}

struct AlbumBuffer {
    messages: Vec<Message>,
}

/// Debounced real-time collector: buffers album members keyed by Telegram's
/// `grouped_id` for one second before emitting, and remembers which albums
/// have already been emitted so late stragglers don't duplicate delivery.
struct RealtimeCollector {
    buffers: Mutex<std::collections::HashMap<i64, AlbumBuffer>>,
    processed: Mutex<VecDeque<i64>>,
    processed_set: Mutex<HashSet<i64>>,
}

impl RealtimeCollector {
    fn new() -> Self {
        Self {
            buffers: Mutex::new(std::collections::HashMap::new()),
            processed: Mutex::new(VecDeque::new()),
            processed_set: Mutex::new(HashSet::new()),
        }
    }

    /// Feeds one incoming message in. Returns `Some(group)` once an album's
    /// debounce window elapses (or immediately for single messages), ready
    /// to hand to the pipeline.
    async fn on_message(
        self: &Arc<Self>,
        message: Message,
        emit: tokio::sync::mpsc::Sender<CollectedGroup>,
    ) {
        let Some(album_id) = message.album_id else {
            let _ = emit.send(CollectedGroup { messages: vec![message] }).await;
            return;
        };

        if self.processed_set.lock().await.contains(&album_id) {
            // Late arrival for an already-emitted album: ignored, so the
            // bounded "processed" set prevents duplicate delivery.
            return;
        }

        let is_new = {
            let mut buffers = self.buffers.lock().await;
            let entry = buffers.entry(album_id).or_insert_with(|| AlbumBuffer { messages: vec![] });
            entry.messages.push(message);
            entry.messages.len() == 1
        };

        if is_new {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;
                let mut buffers = this.buffers.lock().await;
                if let Some(mut buffer) = buffers.remove(&album_id) {
                    drop(buffers);
                    buffer.messages.sort_by_key(|m| m.id);
                    this.mark_processed(album_id).await;
                    let _ = emit.send(CollectedGroup { messages: buffer.messages }).await;
                }
            });
        }
    }

    async fn mark_processed(&self, album_id: i64) {
        let mut set = self.processed_set.lock().await;
        let mut queue = self.processed.lock().await;
        set.insert(album_id);
        queue.push_back(album_id);
        if set.len() > PROCESSED_EVICT_AT {
            while queue.len() > PROCESSED_KEEP {
                if let Some(oldest) = queue.pop_front() {
                    set.remove(&oldest);
                }
            }
        }
    }
}

/// Parses a `YYYY-M-D-H` duration bound. Returns `None` for an empty
/// string (unbounded); rejects a timestamp that has already passed.
pub fn parse_duration_bound(s: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>, DomainError> {
    if s.trim().is_empty() {
        return Ok(None);
    }
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 4 {
        return Err(DomainError::Config(format!(
            "invalid MONITOR.duration '{s}', expected YYYY-M-D-H"
        )));
    }
    let (y, m, d, h) = (
        parts[0].parse::<i32>(),
        parts[1].parse::<u32>(),
        parts[2].parse::<u32>(),
        parts[3].parse::<u32>(),
    );
    let (y, m, d, h) = match (y, m, d, h) {
        (Ok(y), Ok(m), Ok(d), Ok(h)) => (y, m, d, h),
        _ => return Err(DomainError::Config(format!("invalid MONITOR.duration '{s}'"))),
    };
    let naive = chrono::NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(h, 0, 0))
        .ok_or_else(|| DomainError::Config(format!("invalid MONITOR.duration '{s}'")))?;
    let dt = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc);
    if dt <= chrono::Utc::now() {
        return Err(DomainError::Config(
            "MONITOR.duration must name a point in the future".into(),
        ));
    }
    Ok(Some(dt))
}

pub struct Monitor {
    pipeline: Arc<Pipeline>,
    gateway: Arc<dyn TgGateway>,
}

impl Monitor {
    pub fn new(pipeline: Arc<Pipeline>, gateway: Arc<dyn TgGateway>) -> Self {
        Self { pipeline, gateway }
    }

    /// Runs the monitor for one `(source, targets)` pair until cancelled or
    /// the duration bound elapses. Every emitted group flows straight into
    /// the pipeline's historical-forward or download/upload path depending
    /// on `source.can_forward`, mirroring a historical run's delivery
    /// logic exactly.
    pub async fn run(
        &self,
        source: ChannelRef,
        targets: Vec<ChannelRef>,
        policy: PairPolicy,
        tmp_root: PathBuf,
        until: Option<chrono::DateTime<chrono::Utc>>,
        cancel: CancelToken,
        pause: PauseToken,
    ) -> Result<PipelineStats, DomainError> {
        let mut updates = self.gateway.subscribe_updates(vec![source.id]).await?;
        let collector = Arc::new(RealtimeCollector::new());
        let (group_tx, mut group_rx) = tokio::sync::mpsc::channel::<CollectedGroup>(16);

        let watchdog_cancel = cancel.clone();
        let watchdog = until.map(|deadline| {
            tokio::spawn(async move {
                let now = chrono::Utc::now();
                if deadline > now {
                    let dur = (deadline - now).to_std().unwrap_or_default();
                    tokio::time::sleep(dur).await;
                    watchdog_cancel.cancel();
                }
            })
        });

        let mut stats = PipelineStats::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            pause.wait_if_paused().await;

            tokio::select! {
                maybe_msg = updates.recv() => {
                    match maybe_msg {
                        Some(message) => {
                            collector.on_message(message, group_tx.clone()).await;
                        }
                        None => {
                            info!(source = source.id, "update stream ended");
                            break;
                        }
                    }
                }
                maybe_group = group_rx.recv() => {
                    if let Some(group) = maybe_group {
                        let groups = vec![group];
                        let group_stats = if source.can_forward {
                            self.pipeline
                                .run_historical_forward(&source, &targets, &policy, groups, &tmp_root, &cancel, &pause)
                                .await
                        } else {
                            let (_producer, consumer) = self.pipeline.spawn(
                                source.clone(),
                                targets.clone(),
                                policy.clone(),
                                groups,
                                tmp_root.clone(),
                                4,
                                cancel.clone(),
                                pause.clone(),
                            );
                            consumer.await.unwrap_or_default()
                        };
                        stats.filtered += group_stats.filtered;
                        stats.delivered_groups += group_stats.delivered_groups;
                        stats.failed_groups += group_stats.failed_groups;
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
            }
        }

        if let Some(handle) = watchdog {
            handle.abort();
        }
        info!(source = source.id, ?stats, "monitor stopped");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debounces_album_members_arriving_within_window() {
        let collector = Arc::new(RealtimeCollector::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);

        let msg = |id: i32| Message {
            id,
            chat_id: 1,
            date: chrono::Utc::now(),
            caption: None,
            media: None,
            album_id: Some(42),
        };

        collector.on_message(msg(2), tx.clone()).await;
        collector.on_message(msg(1), tx.clone()).await;

        let group = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("group emitted within debounce window")
            .expect("channel open");
        assert_eq!(group.messages.len(), 2);
        assert_eq!(group.messages[0].id, 1, "sorted ascending by id");
    }

    #[test]
    fn rejects_past_duration_bound() {
        let past = "2000-1-1-0";
        assert!(parse_duration_bound(past).is_err());
    }

    #[test]
    fn accepts_empty_duration_as_unbounded() {
        assert_eq!(parse_duration_bound("").unwrap(), None);
    }
}
