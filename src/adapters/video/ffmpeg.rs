//! Video helper adapter: shell out to `ffprobe`/`ffmpeg` and treat a
//! missing binary or non-zero exit as "metadata unavailable", never fatal.
//! Results are cached per file path for the life of the group.
//!
//! `tokio::process::Command` already drives the child process off the
//! calling task without blocking the executor thread, so no extra
//! `spawn_blocking` hop is needed here (unlike the directory-size walk,
//! which does genuine synchronous file IO).

use crate::ports::{VideoPort, VideoThumbnail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Cached {
    dimensions: Option<(u32, u32)>,
    duration: Option<f64>,
    thumbnail: Option<VideoThumbnail>,
}

pub struct FfmpegVideoHelper {
    cache: Mutex<HashMap<PathBuf, Cached>>,
}

impl Default for FfmpegVideoHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegVideoHelper {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn probe(&self, path: &Path) -> Option<(u32, u32, f64)> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            debug!(path = %path.display(), "ffprobe failed, metadata unavailable");
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut width = None;
        let mut height = None;
        let mut duration = None;
        for line in text.lines() {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() >= 2 {
                if let (Ok(w), Ok(h)) = (parts[0].parse(), parts[1].parse()) {
                    width = Some(w);
                    height = Some(h);
                }
            } else if parts.len() == 1 {
                if let Ok(d) = parts[0].trim().parse() {
                    duration = Some(d);
                }
            }
        }
        Some((width?, height?, duration.unwrap_or(0.0)))
    }
}

#[async_trait::async_trait]
impl VideoPort for FfmpegVideoHelper {
    async fn dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        if let Some(cached) = self.cache.lock().await.get(path) {
            if cached.dimensions.is_some() {
                return cached.dimensions;
            }
        }
        let (w, h, _) = self.probe(path).await?;
        let mut cache = self.cache.lock().await;
        cache.entry(path.to_path_buf()).or_default().dimensions = Some((w, h));
        Some((w, h))
    }

    async fn duration(&self, path: &Path) -> Option<f64> {
        if let Some(cached) = self.cache.lock().await.get(path) {
            if cached.duration.is_some() {
                return cached.duration;
            }
        }
        let (_, _, d) = self.probe(path).await?;
        let mut cache = self.cache.lock().await;
        cache.entry(path.to_path_buf()).or_default().duration = Some(d);
        Some(d)
    }

    async fn thumbnail(&self, path: &Path, dest_dir: &Path) -> Option<VideoThumbnail> {
        if let Some(cached) = self.cache.lock().await.get(path) {
            if cached.thumbnail.is_some() {
                return cached.thumbnail.clone();
            }
        }

        let (width, height, duration_secs) = self.probe(path).await.unwrap_or((0, 0, 0.0));

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("thumb");
        let thumb_path = dest_dir.join(format!("{stem}_thumb.jpg"));

        let status = Command::new("ffmpeg")
            .args(["-y", "-ss", "00:00:01.000", "-i"])
            .arg(path)
            .args(["-vframes", "1", "-vf", "scale=320:-1"])
            .arg(&thumb_path)
            .status()
            .await
            .ok()?;

        if !status.success() || !tokio::fs::try_exists(&thumb_path).await.unwrap_or(false) {
            debug!(path = %path.display(), "ffmpeg thumbnail extraction failed");
            return None;
        }

        let thumb = VideoThumbnail {
            path: thumb_path,
            width,
            height,
            duration_secs,
        };
        let mut cache = self.cache.lock().await;
        cache.entry(path.to_path_buf()).or_default().thumbnail = Some(thumb.clone());
        Some(thumb)
    }
}
