//! Wiring & DI. Entry point: parse the CLI, bootstrap config/logging/the
//! Telegram client, run the requested subcommand, handle graceful shutdown
//! on `SIGINT`/`SIGTERM` with the corresponding process exit code.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tg_forwarder::adapters::persistence::JsonHistoryStore;
use tg_forwarder::adapters::telegram::{open_file_session, GrammersAuthAdapter, GrammersTgGateway};
use tg_forwarder::adapters::video::FfmpegVideoHelper;
use tg_forwarder::domain::{CancelToken, DomainError, MediaKind, PairPolicy, PauseToken};
use tg_forwarder::ports::{AuthPort, HistoryPort, ProgressSink, TgGateway, TracingProgressSink, VideoPort};
use tg_forwarder::shared::config::AppConfig;
use tg_forwarder::usecases::{
    AuthService, ChannelResolver, CollectorParams, FloodWaitHandler, HistoricalCollector, Monitor,
    Pipeline,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tg-forwarder", about = "Replicates messages, media and albums between Telegram channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Historical download: source channels to local disk.
    Download {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long)]
        pair: Option<String>,
    },
    /// Local folder to target channels.
    Upload {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long)]
        pair: Option<String>,
        #[arg(long)]
        directory: Option<PathBuf>,
    },
    /// Historical forward: source channels to target channels.
    Forward {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long)]
        pair: Option<String>,
    },
    /// Real-time monitor: subscribes to new messages and forwards them live.
    Monitor {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long)]
        pair: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("TG_FWD_LOG").unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download { config, pair } => run_download(&config, pair.as_deref()).await,
        Commands::Upload { config, pair, directory } => {
            run_upload(&config, pair.as_deref(), directory).await
        }
        Commands::Forward { config, pair } => run_forward(&config, pair.as_deref()).await,
        Commands::Monitor { config, pair } => run_monitor(&config, pair.as_deref()).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "unrecoverable error");
            std::process::exit(1);
        }
    }
}

/// Shared bootstrap: loads config, opens the Telegram client/session, runs
/// the login flow if needed, and builds the resolver/rate-limiter/gateway
/// triple every subcommand needs.
struct Bootstrap {
    cfg: AppConfig,
    gateway: Arc<dyn TgGateway>,
    resolver: Arc<ChannelResolver>,
    rate_limiter: Arc<FloodWaitHandler>,
    history: Arc<dyn HistoryPort>,
    video: Arc<dyn VideoPort>,
    progress: Arc<dyn ProgressSink>,
}

async fn bootstrap(config_path: &Path, task_label: &str) -> anyhow::Result<Bootstrap> {
    let cfg = AppConfig::load(config_path).map_err(|e| anyhow::anyhow!("{e}"))?;

    let session_path = PathBuf::from("session.db");
    let client = create_telegram_client(&cfg, &session_path).await?;

    let auth: Arc<dyn AuthPort> =
        Arc::new(GrammersAuthAdapter::new(client.clone(), cfg.general.api_hash.clone()));
    let auth_service = AuthService::new(Arc::clone(&auth));
    auth_service
        .run_auth_flow(&cfg.general.phone_number)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let gateway: Arc<dyn TgGateway> = Arc::new(GrammersTgGateway::new(client));
    let resolver = Arc::new(ChannelResolver::new(Arc::clone(&gateway)));
    let rate_limiter = Arc::new(FloodWaitHandler::new(
        cfg.general.max_retries,
        cfg.base_delay_or_default(),
    ));
    let history: Arc<dyn HistoryPort> = Arc::new(
        JsonHistoryStore::open(Path::new("data"))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );
    let video: Arc<dyn VideoPort> = Arc::new(FfmpegVideoHelper::new());
    let progress: Arc<dyn ProgressSink> = Arc::new(TracingProgressSink {
        label: task_label.to_string(),
    });

    Ok(Bootstrap {
        cfg,
        gateway,
        resolver,
        rate_limiter,
        history,
        video,
        progress,
    })
}

/// Builds a grammers `Client` with persistent session storage: a
/// `SqliteSession` backing a `SenderPool`, handle cloned into the client,
/// the pool runner driven on its own task.
async fn create_telegram_client(
    cfg: &AppConfig,
    session_path: &Path,
) -> anyhow::Result<grammers_client::Client> {
    if cfg.general.api_id == 0 {
        anyhow::bail!("GENERAL.api_id must be set in the config file (get one from https://my.telegram.org)");
    }
    let session = open_file_session(session_path).await?;
    let session = Arc::new(session);
    let pool = grammers_client::SenderPool::new(session, cfg.general.api_id);
    let handle = pool.handle.clone();
    tokio::spawn(async move {
        pool.runner.run().await;
    });
    Ok(grammers_client::Client::new(handle))
}

fn media_kinds_from_strings(names: &[String]) -> Vec<MediaKind> {
    names
        .iter()
        .filter_map(|n| match n.to_lowercase().as_str() {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            "document" => Some(MediaKind::Document),
            "audio" => Some(MediaKind::Audio),
            "animation" => Some(MediaKind::Animation),
            other => {
                warn!(media_type = other, "unrecognised media type in config, ignoring");
                None
            }
        })
        .collect()
}

/// Installs `SIGINT`/`SIGTERM` handling: sets `cancel` the moment either
/// arrives, giving the running command a chance at graceful shutdown
/// before a second signal forces an exit.
fn spawn_shutdown_watcher(cancel: CancelToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        warn!("shutdown signal received, cancelling");
        cancel.cancel();
    });
}

async fn run_download(config_path: &Path, pair_filter: Option<&str>) -> anyhow::Result<()> {
    let bs = bootstrap(config_path, "download").await?;
    let cancel = CancelToken::new();
    let pause = PauseToken::new();
    spawn_shutdown_watcher(cancel.clone());

    let collector = HistoricalCollector::new(Arc::clone(&bs.gateway), Arc::clone(&bs.history));
    let download_root = PathBuf::from(&bs.cfg.download.download_path);
    let dir_size_limit_bytes = bs
        .cfg
        .download
        .dir_size_limit_enabled
        .then(|| bs.cfg.download.dir_size_limit * 1024 * 1024);

    for setting in &bs.cfg.download.download_setting {
        for source_raw in &setting.source_channels {
            if let Some(filter) = pair_filter {
                if source_raw != filter {
                    continue;
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            let source = bs.resolver.resolve(source_raw).await?;
            let params = CollectorParams {
                start_id: setting.start_id,
                end_id: setting.end_id,
                media_kinds_allowed: media_kinds_from_strings(&setting.media_types),
                page_size: 100,
            };
            let groups = collector.collect(&source, &[], params).await?;
            info!(source = %source_raw, groups = groups.len(), "collected groups for download");

            for group in groups {
                pause.wait_if_paused().await;
                if cancel.is_cancelled() {
                    break;
                }
                if let Some(limit) = dir_size_limit_bytes {
                    let size = tg_forwarder::shared::fs::directory_size(&download_root).await;
                    if size > limit {
                        bs.progress.error(
                            "download quota exceeded",
                            &format!("download directory exceeds {limit} bytes"),
                            &format!("current size {size} bytes"),
                            true,
                        );
                        break;
                    }
                }
                for message in &group.messages {
                    if bs.history.is_downloaded(source.id, message.id).await? {
                        continue;
                    }
                    if message.media.is_none() {
                        continue;
                    }
                    tokio::fs::create_dir_all(&download_root).await.ok();
                    let dest = download_root.join(format!("{}_{}.bin", source.id, message.id));
                    let gateway = Arc::clone(&bs.gateway);
                    let source_id = source.id;
                    let message_id = message.id;
                    let dest_clone = dest.clone();
                    let result = bs
                        .rate_limiter
                        .call(&cancel, move || {
                            let gateway = Arc::clone(&gateway);
                            let dest = dest_clone.clone();
                            async move { gateway.download_media(source_id, message_id, &dest).await }
                        })
                        .await;
                    match result {
                        Ok(()) => {
                            bs.history
                                .mark_downloaded(tg_forwarder::domain::DownloadRecord {
                                    source_chat_id: source.id,
                                    message_id: message.id,
                                })
                                .await?;
                        }
                        Err(e) => warn!(message_id = message.id, error = %e, "download failed"),
                    }
                }
            }
        }
    }
    bs.progress.complete(true, "download run complete");
    Ok(())
}

async fn run_upload(
    config_path: &Path,
    pair_filter: Option<&str>,
    directory_override: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bs = bootstrap(config_path, "upload").await?;
    let cancel = CancelToken::new();
    spawn_shutdown_watcher(cancel.clone());

    let directory = directory_override
        .or_else(|| bs.cfg.upload.directory.clone().map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("no upload directory given (--directory or UPLOAD.directory)"))?;

    let mut targets = Vec::new();
    for raw in &bs.cfg.upload.target_channels {
        if let Some(filter) = pair_filter {
            if raw != filter {
                continue;
            }
        }
        targets.push(bs.resolver.resolve(raw).await?);
    }
    if targets.is_empty() {
        anyhow::bail!("no matching target channels for upload");
    }

    let delay = std::time::Duration::from_secs_f64(bs.cfg.upload.delay_between_uploads.max(0.0));
    let mut entries = tokio::fs::read_dir(&directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        if cancel.is_cancelled() {
            break;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let caption = caption_for_upload(&bs.cfg, &directory, &path).await;
        let kind = media_kind_for_extension(&path);
        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            continue;
        }
        let mut file = tg_forwarder::domain::DownloadedFile {
            message_id: 0,
            path: path.clone(),
            kind,
            size,
            thumbnail: None,
            width: None,
            height: None,
            duration_secs: None,
        };
        if bs.cfg.upload.options.auto_thumbnail && kind == MediaKind::Video {
            if let Some(thumb) = bs.video.thumbnail(&path, &directory).await {
                file.thumbnail = Some(thumb.path);
                file.width = Some(thumb.width);
                file.height = Some(thumb.height);
                file.duration_secs = Some(thumb.duration_secs);
            }
        }
        for target in &targets {
            let path_str = path.to_string_lossy().to_string();
            if bs.history.is_uploaded(&path_str, target.id).await? {
                continue;
            }
            let gateway = Arc::clone(&bs.gateway);
            let target_id = target.id;
            let file_clone = file.clone();
            let caption_clone = caption.clone();
            let result = bs
                .rate_limiter
                .call(&cancel, move || {
                    let gateway = Arc::clone(&gateway);
                    let file = file_clone.clone();
                    let caption = caption_clone.clone();
                    async move { gateway.send_single(target_id, Some(&file), caption.as_deref()).await }
                })
                .await;
            match result {
                Ok(_) => {
                    bs.history
                        .mark_uploaded(tg_forwarder::domain::UploadRecord {
                            file_path: path_str,
                            target_chat_id: target.id,
                            size,
                            kind,
                        })
                        .await?;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "upload failed"),
            }
            tokio::time::sleep(delay).await;
        }
    }

    if bs.cfg.upload.options.send_final_message {
        send_final_message(&bs, &targets, &cancel, delay).await;
    }

    bs.progress.complete(true, "upload run complete");
    Ok(())
}

/// `UPLOAD.options.send_final_message`: an HTML message appended to every
/// target once the directory upload completes, read from
/// `final_message_html_file`. Failure to read the file is a warning, not
/// a fatal error — the bulk upload already succeeded.
async fn send_final_message(
    bs: &Bootstrap,
    targets: &[tg_forwarder::domain::ChannelRef],
    cancel: &CancelToken,
    delay: std::time::Duration,
) {
    let Some(path) = &bs.cfg.upload.options.final_message_html_file else {
        warn!("UPLOAD.options.send_final_message is set but final_message_html_file is empty, skipping");
        return;
    };
    let html = match tokio::fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path, error = %e, "failed to read final_message_html_file, skipping final message");
            return;
        }
    };
    for target in targets {
        if cancel.is_cancelled() {
            break;
        }
        let gateway = Arc::clone(&bs.gateway);
        let target_id = target.id;
        let html_clone = html.clone();
        let result = bs
            .rate_limiter
            .call(cancel, move || {
                let gateway = Arc::clone(&gateway);
                let html = html_clone.clone();
                async move { gateway.send_single(target_id, None, Some(&html)).await }
            })
            .await;
        if let Err(e) = result {
            warn!(target = target_id, error = %e, "failed to send final message");
        }
        tokio::time::sleep(delay).await;
    }
}

async fn caption_for_upload(cfg: &AppConfig, directory: &Path, file: &Path) -> Option<String> {
    if cfg.upload.options.use_folder_name {
        return directory.file_name().map(|n| n.to_string_lossy().to_string());
    }
    if cfg.upload.options.read_title_txt {
        let title_path = directory.join("title.txt");
        if let Ok(contents) = tokio::fs::read_to_string(&title_path).await {
            return Some(contents.trim().to_string());
        }
    }
    let filename = file.file_name()?.to_string_lossy().to_string();
    Some(cfg.upload.caption_template.replace("{filename}", &filename))
}

fn media_kind_for_extension(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" => MediaKind::Photo,
        "mp4" | "avi" | "mkv" | "mov" | "flv" | "webm" => MediaKind::Video,
        "mp3" | "ogg" | "m4a" | "wav" | "flac" | "aac" => MediaKind::Audio,
        _ => MediaKind::Document,
    }
}

async fn run_forward(config_path: &Path, pair_filter: Option<&str>) -> anyhow::Result<()> {
    let bs = bootstrap(config_path, "forward").await?;
    let cancel = CancelToken::new();
    let pause = PauseToken::new();
    spawn_shutdown_watcher(cancel.clone());

    let media_kinds = media_kinds_from_strings(&bs.cfg.forward.media_types);

    let pipeline = Arc::new(Pipeline {
        gateway: Arc::clone(&bs.gateway),
        history: Arc::clone(&bs.history),
        video: Arc::clone(&bs.video),
        rate_limiter: Arc::clone(&bs.rate_limiter),
        resolver: Arc::clone(&bs.resolver),
        progress: Arc::clone(&bs.progress),
        inter_group_sleep: std::time::Duration::from_secs_f64(bs.cfg.forward.forward_delay.max(0.0)),
        inter_target_sleep: bs.cfg.inter_target_sleep_or_default(),
        dir_size_limit_bytes: bs
            .cfg
            .download
            .dir_size_limit_enabled
            .then(|| bs.cfg.download.dir_size_limit * 1024 * 1024),
    });
    let collector = HistoricalCollector::new(Arc::clone(&bs.gateway), Arc::clone(&bs.history));
    let tmp_root = PathBuf::from(&bs.cfg.forward.tmp_path);

    for pair in &bs.cfg.forward.forward_channel_pairs {
        if let Some(filter) = pair_filter {
            if pair.source_channel != filter {
                continue;
            }
        }
        if cancel.is_cancelled() {
            break;
        }
        let source = bs.resolver.resolve(&pair.source_channel).await?;
        let mut targets = Vec::new();
        for raw in &pair.target_channels {
            targets.push(bs.resolver.resolve(raw).await?);
        }

        let policy = PairPolicy {
            media_kinds: media_kinds.clone(),
            keywords: pair.keywords.clone(),
            text_replacements: pair.text_replacements.clone(),
            remove_captions: bs.cfg.forward.remove_captions,
            final_message_html: pair.final_message.clone(),
        };

        let target_ids: Vec<i64> = targets.iter().map(|t| t.id).collect();
        let params = CollectorParams {
            start_id: bs.cfg.forward.start_id,
            end_id: bs.cfg.forward.end_id,
            media_kinds_allowed: policy.media_kinds.clone(),
            page_size: 100,
        };
        let groups = collector.collect(&source, &target_ids, params).await?;
        info!(source = %pair.source_channel, groups = groups.len(), "collected groups for forward");

        if source.can_forward {
            pipeline
                .run_historical_forward(&source, &targets, &policy, groups, &tmp_root, &cancel, &pause)
                .await;
        } else {
            let (producer, consumer) = pipeline.spawn(
                source,
                targets,
                policy.clone(),
                groups,
                tmp_root.clone(),
                bs.cfg.queue_capacity_or_default(),
                cancel.clone(),
                pause.clone(),
            );
            let _ = tokio::join!(producer, consumer);
        }
    }

    bs.progress.complete(true, "forward run complete");
    Ok(())
}

async fn run_monitor(config_path: &Path, pair_filter: Option<&str>) -> anyhow::Result<()> {
    let bs = bootstrap(config_path, "monitor").await?;
    let cancel = CancelToken::new();
    let pause = PauseToken::new();
    spawn_shutdown_watcher(cancel.clone());

    let media_kinds = media_kinds_from_strings(&bs.cfg.monitor.media_types);

    let until = tg_forwarder::usecases::monitor::parse_duration_bound(&bs.cfg.monitor.duration)
        .map_err(|e: DomainError| anyhow::anyhow!("{e}"))?;

    let pipeline = Arc::new(Pipeline {
        gateway: Arc::clone(&bs.gateway),
        history: Arc::clone(&bs.history),
        video: Arc::clone(&bs.video),
        rate_limiter: Arc::clone(&bs.rate_limiter),
        resolver: Arc::clone(&bs.resolver),
        progress: Arc::clone(&bs.progress),
        inter_group_sleep: std::time::Duration::from_secs_f64(bs.cfg.monitor.forward_delay.max(0.0)),
        inter_target_sleep: bs.cfg.inter_target_sleep_or_default(),
        dir_size_limit_bytes: None,
    });
    let monitor = Monitor::new(Arc::clone(&pipeline), Arc::clone(&bs.gateway));
    let tmp_root = PathBuf::from("tmp/monitor");

    for pair in &bs.cfg.monitor.monitor_channel_pairs {
        if let Some(filter) = pair_filter {
            if pair.source_channel != filter {
                continue;
            }
        }
        if cancel.is_cancelled() {
            break;
        }
        let source = bs.resolver.resolve(&pair.source_channel).await?;
        let mut targets = Vec::new();
        for raw in &pair.target_channels {
            targets.push(bs.resolver.resolve(raw).await?);
        }
        let policy = PairPolicy {
            media_kinds: media_kinds.clone(),
            keywords: pair.keywords.clone(),
            text_replacements: pair.text_replacements.clone(),
            remove_captions: bs.cfg.monitor.remove_captions,
            final_message_html: pair.final_message.clone(),
        };
        monitor
            .run(
                source,
                targets,
                policy.clone(),
                tmp_root.clone(),
                until,
                cancel.clone(),
                pause.clone(),
            )
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    bs.progress.complete(true, "monitor run complete");
    Ok(())
}
