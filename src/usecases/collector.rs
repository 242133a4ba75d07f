//! Historical media-group collector: walks a channel's history and emits
//! `MediaGroup` values ready for the producer, skipping disallowed,
//! out-of-range, or fully-delivered messages and de-duplicating albums via
//! a "seen" set.

use crate::domain::{ChannelRef, MediaKind, Message};
use crate::ports::{HistoryPort, TgGateway};
use std::collections::HashSet;
use std::sync::Arc;

/// One unit the collector hands to the producer: either a single message
/// or the full set of messages belonging to one album.
#[derive(Debug, Clone)]
pub struct CollectedGroup {
    pub messages: Vec<Message>,
}

pub struct HistoricalCollector {
    gateway: Arc<dyn TgGateway>,
    history: Arc<dyn HistoryPort>,
}

/// Parameters bounding one collection run.
pub struct CollectorParams {
    pub start_id: i32,
    pub end_id: Option<i32>,
    pub media_kinds_allowed: Vec<MediaKind>,
    pub page_size: i32,
}

impl HistoricalCollector {
    pub fn new(gateway: Arc<dyn TgGateway>, history: Arc<dyn HistoryPort>) -> Self {
        Self { gateway, history }
    }

    /// Collects every eligible group from `source`'s history, sequentially,
    /// returning them in ascending source-message-id order so the producer
    /// preserves per-pair delivery order.
    pub async fn collect(
        &self,
        source: &ChannelRef,
        targets: &[i64],
        params: CollectorParams,
    ) -> Result<Vec<CollectedGroup>, crate::domain::DomainError> {
        let mut seen_albums: HashSet<i64> = HashSet::new();
        let mut groups = Vec::new();
        // Telegram's GetHistory walks newest-first; collect the whole
        // window into memory page by page, then reverse to emit in
        // ascending id order (bounded by start_id/end_id, never unbounded).
        let mut offset_id = 0i32;
        let min_id = params.start_id.max(0);
        let max_id = params.end_id.unwrap_or(0);
        let mut fetched_all = Vec::new();

        loop {
            let page = self
                .gateway
                .get_history(source.id, offset_id, min_id, max_id, params.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let last_id = page.last().map(|m| m.id).unwrap_or(0);
            fetched_all.extend(page);
            if last_id <= min_id.max(1) {
                break;
            }
            offset_id = last_id;
        }

        fetched_all.sort_by_key(|m| m.id);

        for message in &fetched_all {
            if message.id < params.start_id {
                continue;
            }
            if let Some(end) = params.end_id {
                if message.id > end {
                    continue;
                }
            }

            let kind = message.media.as_ref().map(|d| d.kind);
            if let Some(kind) = kind {
                if !params.media_kinds_allowed.is_empty()
                    && !params.media_kinds_allowed.contains(&kind)
                {
                    continue;
                }
            }

            if self
                .history
                .is_forwarded_to_all(source.id, message.id, targets)
                .await?
            {
                continue;
            }

            if let Some(album_id) = message.album_id {
                if seen_albums.contains(&album_id) {
                    continue;
                }
                seen_albums.insert(album_id);
                let album = self
                    .gateway
                    .get_media_group(source.id, message.id, album_id)
                    .await?;
                groups.push(CollectedGroup { messages: album });
            } else {
                groups.push(CollectedGroup { messages: vec![message.clone()] });
            }
        }

        groups.sort_by_key(|g| g.messages.iter().map(|m| m.id).min().unwrap_or(i32::MAX));
        Ok(groups)
    }
}
