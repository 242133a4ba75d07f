//! Video helper collaborator contract. Any failure is non-fatal: callers
//! proceed without the missing metadata.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct VideoThumbnail {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

#[async_trait::async_trait]
pub trait VideoPort: Send + Sync {
    async fn dimensions(&self, path: &Path) -> Option<(u32, u32)>;
    async fn duration(&self, path: &Path) -> Option<f64>;
    async fn thumbnail(&self, path: &Path, dest_dir: &Path) -> Option<VideoThumbnail>;
}
