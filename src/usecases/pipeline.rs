//! Parallel download-upload pipeline — the centrepiece.
//! One producer task downloads and assembles `MediaGroup`s; one consumer
//! task uploads/copies/forwards them to every configured target. A bounded
//! `tokio::mpsc` channel between the two is the queue; blocking on a full
//! channel *is* the backpressure.

use crate::domain::{
    CancelToken, ChannelRef, DomainError, DownloadedFile, ForwardRecord, MediaGroup, MediaKind,
    PauseToken, UploadRecord,
};
use crate::ports::{HistoryPort, ProgressSink, TgGateway, VideoPort};
use crate::usecases::collector::CollectedGroup;
use crate::usecases::rate_limiter::FloodWaitHandler;
use crate::usecases::resolver::ChannelResolver;
use crate::usecases::text_processor;
use crate::{domain::PairPolicy, shared::fs as fs_helpers};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const DOWNLOAD_CONCURRENCY: usize = 5;
const THUMBNAIL_CONCURRENCY: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub filtered: u64,
    pub delivered_groups: u64,
    pub failed_groups: u64,
}

/// Everything the pipeline needs beyond the resolved source/targets/policy;
/// split out so `Pipeline` can be built once per process and reused across
/// pairs.
pub struct Pipeline {
    pub gateway: Arc<dyn TgGateway>,
    pub history: Arc<dyn HistoryPort>,
    pub video: Arc<dyn VideoPort>,
    pub rate_limiter: Arc<FloodWaitHandler>,
    pub resolver: Arc<ChannelResolver>,
    pub progress: Arc<dyn ProgressSink>,
    pub inter_group_sleep: std::time::Duration,
    pub inter_target_sleep: std::time::Duration,
    pub dir_size_limit_bytes: Option<u64>,
}

impl Pipeline {
    /// Spawns the producer and consumer tasks for one `(source, targets)`
    /// run and returns their join handles.
    pub fn spawn(
        self: &Arc<Self>,
        source: ChannelRef,
        targets: Vec<ChannelRef>,
        policy: PairPolicy,
        groups: Vec<CollectedGroup>,
        tmp_root: PathBuf,
        queue_capacity: usize,
        cancel: CancelToken,
        pause: PauseToken,
    ) -> (JoinHandle<PipelineStats>, JoinHandle<PipelineStats>) {
        let (tx, rx) = mpsc::channel::<MediaGroup>(queue_capacity.max(1));

        let producer_pipeline = Arc::clone(self);
        let producer_source = source.clone();
        let producer_policy = policy.clone();
        let producer_cancel = cancel.clone();
        let producer_pause = pause.clone();
        let producer = tokio::spawn(async move {
            producer_pipeline
                .run_producer(
                    producer_source,
                    producer_policy,
                    groups,
                    tmp_root,
                    tx,
                    producer_cancel,
                    producer_pause,
                )
                .await
        });

        let consumer_pipeline = Arc::clone(self);
        let consumer_targets = targets;
        let consumer_cancel = cancel;
        let consumer_pause = pause;
        let consumer = tokio::spawn(async move {
            consumer_pipeline
                .run_consumer(source, consumer_targets, rx, consumer_cancel, consumer_pause)
                .await
        });

        (producer, consumer)
    }

    async fn run_producer(
        &self,
        source: ChannelRef,
        policy: PairPolicy,
        groups: Vec<CollectedGroup>,
        tmp_root: PathBuf,
        tx: mpsc::Sender<MediaGroup>,
        cancel: CancelToken,
        pause: PauseToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();
        let semaphore = Arc::new(Semaphore::new(DOWNLOAD_CONCURRENCY));

        for collected in groups {
            pause.wait_if_paused().await;
            if cancel.is_cancelled() {
                break;
            }

            if let Some(limit) = self.dir_size_limit_bytes {
                let size = fs_helpers::directory_size(&tmp_root).await;
                if size > limit {
                    self.progress.error(
                        "download quota exceeded",
                        &format!("download directory exceeds {limit} bytes"),
                        &format!("current size {size} bytes"),
                        true,
                    );
                    break;
                }
            }

            match self
                .produce_one(&source, &policy, collected, &tmp_root, &semaphore, &cancel)
                .await
            {
                Ok(Some(group)) => {
                    if tx.send(group).await.is_err() {
                        break;
                    }
                }
                Ok(None) => stats.filtered += 1,
                Err(e) => {
                    warn!(error = %e, "producer: group failed, skipping");
                    stats.failed_groups += 1;
                }
            }
        }
        stats
    }

    async fn produce_one(
        &self,
        source: &ChannelRef,
        policy: &PairPolicy,
        collected: CollectedGroup,
        tmp_root: &Path,
        semaphore: &Arc<Semaphore>,
        cancel: &CancelToken,
    ) -> Result<Option<MediaGroup>, DomainError> {
        let album_id = collected.messages.first().and_then(|m| m.album_id);
        let group_key = album_id.unwrap_or_else(|| collected.messages[0].id as i64);
        let group_dir = tmp_root.join(fs_helpers::group_dir_name(group_key));
        tokio::fs::create_dir_all(&group_dir)
            .await
            .map_err(|e| DomainError::Download(format!("create temp dir: {e}")))?;

        let ids: Vec<i32> = collected.messages.iter().map(|m| m.id).collect();
        let gateway = Arc::clone(&self.gateway);
        let chat_id = source.id;
        let mut messages = self
            .rate_limiter
            .call(cancel, move || {
                let gateway = Arc::clone(&gateway);
                let ids = ids.clone();
                async move { gateway.get_messages_by_id(chat_id, &ids).await }
            })
            .await?;
        // `get_messages_by_id` doesn't guarantee transport order; the rest
        // of this group's assembly (caption extraction, file ordering)
        // depends on ascending message id, same as `get_media_group`'s own
        // post-fetch sort.
        messages.sort_by_key(|m| m.id);

        let caption = match text_processor::process_group(
            policy,
            &MediaGroup {
                source: source.clone(),
                messages: messages.clone(),
                caption: None,
                files: vec![],
                temp_dir: group_dir.clone(),
            },
        ) {
            Some(caption) => caption,
            None => {
                fs_helpers::cleanup_empty_parents(&group_dir).await;
                return Ok(None);
            }
        };

        let mut handles = Vec::new();
        for message in messages
            .iter()
            .filter(|m| policy.allows(m.media.as_ref().map(|d| d.kind).unwrap_or(MediaKind::Document)))
            .filter(|m| m.media.is_some())
            .cloned()
        {
            let permit = Arc::clone(semaphore);
            let gateway = Arc::clone(&self.gateway);
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let dest_dir = group_dir.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                let kind = message.media.as_ref()?.kind;
                let ext = default_extension(kind);
                let filename = fs_helpers::sanitize_filename(&format!("{}{ext}", message.id));
                let dest_path = dest_dir.join(&filename);
                let chat_id = message.chat_id;
                let message_id = message.id;
                let path_for_closure = dest_path.clone();
                let result = rate_limiter
                    .call(&cancel, move || {
                        let gateway = Arc::clone(&gateway);
                        let path = path_for_closure.clone();
                        async move { gateway.download_media(chat_id, message_id, &path).await }
                    })
                    .await;
                match result {
                    Ok(()) => {
                        let size = tokio::fs::metadata(&dest_path)
                            .await
                            .map(|m| m.len())
                            .unwrap_or(0);
                        Some(DownloadedFile {
                            message_id,
                            path: dest_path,
                            kind,
                            size,
                            thumbnail: None,
                            width: None,
                            height: None,
                            duration_secs: None,
                        })
                    }
                    Err(e) => {
                        warn!(message_id, error = %e, "download failed, skipping file");
                        None
                    }
                }
            }));
        }

        let mut files = Vec::new();
        for handle in handles {
            if let Ok(Some(file)) = handle.await {
                files.push(file);
            }
        }

        Ok(Some(MediaGroup {
            source: source.clone(),
            messages,
            caption,
            files,
            temp_dir: group_dir,
        }))
    }

    async fn run_consumer(
        &self,
        source: ChannelRef,
        targets: Vec<ChannelRef>,
        mut rx: mpsc::Receiver<MediaGroup>,
        cancel: CancelToken,
        pause: PauseToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();
        loop {
            pause.wait_if_paused().await;
            if cancel.is_cancelled() {
                break;
            }
            let group = match tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await {
                Ok(Some(group)) => group,
                Ok(None) => break,
                Err(_) => continue,
            };

            match self.consume_one(&source, &targets, group, &cancel).await {
                Ok(true) => stats.delivered_groups += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "consumer: group failed");
                    stats.failed_groups += 1;
                }
            }
            tokio::time::sleep(self.inter_group_sleep).await;
        }
        stats
    }

    /// Delivers one already-downloaded `MediaGroup` to every target still
    /// pending, chaining server-side copies off the first delivered target.
    /// Returns whether anything was delivered.
    async fn consume_one(
        &self,
        source: &ChannelRef,
        targets: &[ChannelRef],
        mut group: MediaGroup,
        cancel: &CancelToken,
    ) -> Result<bool, DomainError> {
        let target_ids: Vec<i64> = targets.iter().map(|t| t.id).collect();
        let mut pending: Vec<&ChannelRef> = Vec::new();
        for target in targets {
            if !self
                .history
                .is_forwarded(source.id, group.lowest_message_id().unwrap_or(0), target.id)
                .await?
            {
                pending.push(target);
            }
        }
        if pending.is_empty() {
            fs_helpers::cleanup_empty_parents(&group.temp_dir).await;
            return Ok(false);
        }

        self.generate_thumbnails(&mut group).await;

        group.files.retain(|f| f.size > 0);
        if group.files.is_empty() && group.caption.is_none() {
            fs_helpers::cleanup_empty_parents(&group.temp_dir).await;
            return Ok(false);
        }

        let message_ids: Vec<i32> = group.messages.iter().map(|m| m.id).collect();
        let mut first_delivery: Option<(i64, Vec<i32>)> = None;
        let mut all_succeeded = true;

        for target in pending {
            let copy_attempt = match &first_delivery {
                Some((from_chat, from_ids)) => {
                    Some(self.try_copy(*from_chat, from_ids, target.id, cancel).await)
                }
                None => None,
            };

            if let Some(Err(DomainError::ForwardRestricted)) = &copy_attempt {
                self.resolver.downgrade_forward_capability(target.id).await;
            }

            let sent_ids = match copy_attempt {
                Some(Ok(ids)) => ids,
                _ => match self.upload_direct(target.id, &group, cancel).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!(target = target.id, error = %e, "upload failed for target");
                        all_succeeded = false;
                        continue;
                    }
                },
            };

            for &mid in &message_ids {
                self.history
                    .mark_forwarded(ForwardRecord {
                        source_chat_id: source.id,
                        message_id: mid,
                        target_chat_id: target.id,
                    })
                    .await?;
            }
            for file in &group.files {
                self.history
                    .mark_uploaded(UploadRecord {
                        file_path: file.path.to_string_lossy().to_string(),
                        target_chat_id: target.id,
                        size: file.size,
                        kind: file.kind,
                    })
                    .await?;
            }

            if first_delivery.is_none() {
                first_delivery = Some((target.id, sent_ids));
            }
            tokio::time::sleep(self.inter_target_sleep).await;
        }

        for file in group.files.iter().filter_map(|f| f.thumbnail.as_ref()) {
            let _ = tokio::fs::remove_file(file).await;
        }
        if all_succeeded {
            fs_helpers::cleanup_empty_parents(&group.temp_dir).await;
        }
        Ok(all_succeeded)
    }

    async fn try_copy(
        &self,
        from_chat: i64,
        from_ids: &[i32],
        to_chat: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<i32>, DomainError> {
        let gateway = Arc::clone(&self.gateway);
        if from_ids.len() == 1 {
            let id = from_ids[0];
            self.rate_limiter
                .call(cancel, move || {
                    let gateway = Arc::clone(&gateway);
                    async move {
                        gateway
                            .copy_message(from_chat, id, to_chat)
                            .await
                            .map(|id| vec![id])
                    }
                })
                .await
        } else {
            let ids = from_ids.to_vec();
            self.rate_limiter
                .call(cancel, move || {
                    let gateway = Arc::clone(&gateway);
                    let ids = ids.clone();
                    async move { gateway.copy_media_group(from_chat, &ids, to_chat).await }
                })
                .await
        }
    }

    async fn upload_direct(
        &self,
        target_chat: i64,
        group: &MediaGroup,
        cancel: &CancelToken,
    ) -> Result<Vec<i32>, DomainError> {
        let gateway = Arc::clone(&self.gateway);
        let caption = group.caption.clone();
        if group.files.len() > 1 {
            let files = group.files.clone();
            self.rate_limiter
                .call(cancel, move || {
                    let gateway = Arc::clone(&gateway);
                    let files = files.clone();
                    let caption = caption.clone();
                    async move {
                        gateway
                            .send_media_group(target_chat, &files, caption.as_deref())
                            .await
                    }
                })
                .await
        } else {
            let file = group.files.first().cloned();
            self.rate_limiter
                .call(cancel, move || {
                    let gateway = Arc::clone(&gateway);
                    let file = file.clone();
                    let caption = caption.clone();
                    async move {
                        gateway
                            .send_single(target_chat, file.as_ref(), caption.as_deref())
                            .await
                            .map(|id| vec![id])
                    }
                })
                .await
        }
    }

    async fn generate_thumbnails(&self, group: &mut MediaGroup) {
        let semaphore = Arc::new(Semaphore::new(THUMBNAIL_CONCURRENCY));
        let mut handles = Vec::new();
        for (idx, file) in group.files.iter().enumerate() {
            if file.kind != MediaKind::Video {
                continue;
            }
            let permit = Arc::clone(&semaphore);
            let video = Arc::clone(&self.video);
            let path = file.path.clone();
            let dest_dir = group.temp_dir.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let thumb = video.thumbnail(&path, &dest_dir).await;
                let dims = video.dimensions(&path).await;
                let duration = video.duration(&path).await;
                (idx, thumb, dims, duration)
            }));
        }
        for handle in handles {
            if let Ok((idx, thumb, dims, duration)) = handle.await {
                if let Some(file) = group.files.get_mut(idx) {
                    if let Some(t) = thumb {
                        file.thumbnail = Some(t.path);
                    }
                    if let Some((w, h)) = dims {
                        file.width = Some(w);
                        file.height = Some(h);
                    }
                    file.duration_secs = duration;
                }
            }
        }
    }

    /// Historical forwarder fast path: used instead of the
    /// producer/consumer download pipeline when the source permits native
    /// forwarding. Falls back to a direct download+upload for any target
    /// that individually rejects the forward.
    pub async fn run_historical_forward(
        &self,
        source: &ChannelRef,
        targets: &[ChannelRef],
        policy: &PairPolicy,
        groups: Vec<CollectedGroup>,
        tmp_root: &Path,
        cancel: &CancelToken,
        pause: &PauseToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();
        let semaphore = Arc::new(Semaphore::new(DOWNLOAD_CONCURRENCY));

        for collected in groups {
            pause.wait_if_paused().await;
            if cancel.is_cancelled() {
                break;
            }
            let message_ids: Vec<i32> = collected.messages.iter().map(|m| m.id).collect();

            let caption = match text_processor::process_group(
                policy,
                &MediaGroup {
                    source: source.clone(),
                    messages: collected.messages.clone(),
                    caption: None,
                    files: vec![],
                    temp_dir: tmp_root.to_path_buf(),
                },
            ) {
                Some(caption) => caption,
                None => {
                    stats.filtered += 1;
                    continue;
                }
            };

            let mut delivered_any = false;
            for target in targets {
                if self.history.is_forwarded_to_all(source.id, message_ids[0], std::slice::from_ref(&target.id)).await.unwrap_or(false) {
                    continue;
                }

                let remove_captions = policy.remove_captions || caption.is_none();
                let gateway = Arc::clone(&self.gateway);
                let ids = message_ids.clone();
                let source_id = source.id;
                let target_id = target.id;
                let forward_result = if remove_captions {
                    // A true forward preserves the caption; an empty
                    // caption request uses copy instead, since caption
                    // removal needs a copy primitive with an empty caption
                    // rather than a true forward.
                    self.try_copy(source_id, &ids, target_id, cancel).await
                } else {
                    self.rate_limiter
                        .call(cancel, move || {
                            let gateway = Arc::clone(&gateway);
                            let ids = ids.clone();
                            async move { gateway.forward_messages(source_id, &ids, target_id).await }
                        })
                        .await
                };

                match forward_result {
                    Ok(_) => {
                        for &mid in &message_ids {
                            let _ = self
                                .history
                                .mark_forwarded(ForwardRecord {
                                    source_chat_id: source.id,
                                    message_id: mid,
                                    target_chat_id: target.id,
                                })
                                .await;
                        }
                        delivered_any = true;
                    }
                    Err(DomainError::ForwardRestricted) => {
                        self.resolver.downgrade_forward_capability(target.id).await;
                        warn!(target = target.id, "forward restricted, falling back to download+upload");
                        if let Ok(Some(mut downloaded)) = self
                            .produce_one(source, policy, collected.clone(), tmp_root, &semaphore, cancel)
                            .await
                        {
                            self.generate_thumbnails(&mut downloaded).await;
                            downloaded.files.retain(|f| f.size > 0);
                            if let Ok(ids) = self.upload_direct(target.id, &downloaded, cancel).await {
                                let _ = ids;
                                for &mid in &message_ids {
                                    let _ = self
                                        .history
                                        .mark_forwarded(ForwardRecord {
                                            source_chat_id: source.id,
                                            message_id: mid,
                                            target_chat_id: target.id,
                                        })
                                        .await;
                                }
                                delivered_any = true;
                            }
                            fs_helpers::cleanup_empty_parents(&downloaded.temp_dir).await;
                        }
                    }
                    Err(e) => {
                        warn!(target = target.id, error = %e, "historical forward failed");
                    }
                }
                tokio::time::sleep(self.inter_target_sleep).await;
            }

            if delivered_any {
                stats.delivered_groups += 1;
            } else {
                stats.failed_groups += 1;
            }
            tokio::time::sleep(self.inter_group_sleep).await;
        }

        info!(
            filtered = stats.filtered,
            delivered = stats.delivered_groups,
            failed = stats.failed_groups,
            "historical forward run complete"
        );
        stats
    }
}

fn default_extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => ".jpg",
        MediaKind::Video => ".mp4",
        MediaKind::Document => ".bin",
        MediaKind::Audio => ".mp3",
        MediaKind::Animation => ".gif",
    }
}
