//! History Store. Three append-mostly JSON files —
//! `download_history.json`, `upload_history.json`, `forward_history.json`
//! under the configured data directory — each guarded by its own mutex so
//! concurrent producer/consumer tasks cannot corrupt state. Read-check-write
//! is therefore a single critical section per file, never held across an
//! `await` to a remote call.
//!
//! On read failure (missing file / corrupt JSON) the store silently
//! re-initialises an empty structure — it must never crash the engine.

use crate::domain::{DomainError, DownloadRecord, ForwardRecord, UploadRecord};
use crate::ports::HistoryPort;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

fn normalize_path(p: &str) -> String {
    Path::new(p)
        .components()
        .collect::<PathBuf>()
        .to_string_lossy()
        .replace('\\', "/")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownloadEntry {
    source_chat_id: i64,
    message_id: i32,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadEntry {
    file_path: String,
    target_chat_id: i64,
    size: u64,
    kind: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForwardEntry {
    source_chat_id: i64,
    message_id: i32,
    target_chat_id: i64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DownloadFile {
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    records: Vec<DownloadEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UploadFile {
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    records: Vec<UploadEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ForwardFile {
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    records: Vec<ForwardEntry>,
}

struct DownloadState {
    file: DownloadFile,
    seen: HashSet<(i64, i32)>,
}

struct UploadState {
    file: UploadFile,
    seen: HashSet<(String, i64)>,
}

struct ForwardState {
    file: ForwardFile,
    seen: HashSet<(i64, i32, i64)>,
}

pub struct JsonHistoryStore {
    download_path: PathBuf,
    upload_path: PathBuf,
    forward_path: PathBuf,
    download: Mutex<DownloadState>,
    upload: Mutex<UploadState>,
    forward: Mutex<ForwardState>,
}

async fn read_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt history file, starting empty");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DomainError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DomainError::History(format!("create history dir: {e}")))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DomainError::History(format!("serialize history: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| DomainError::History(format!("write history temp file: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DomainError::History(format!("rename history file: {e}")))?;
    Ok(())
}

impl JsonHistoryStore {
    /// Loads (or initialises) the three files rooted at `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, DomainError> {
        let download_path = data_dir.join("download_history.json");
        let upload_path = data_dir.join("upload_history.json");
        let forward_path = data_dir.join("forward_history.json");

        let download_file: DownloadFile = read_or_default(&download_path).await;
        let upload_file: UploadFile = read_or_default(&upload_path).await;
        let forward_file: ForwardFile = read_or_default(&forward_path).await;

        let download_seen = download_file
            .records
            .iter()
            .map(|r| (r.source_chat_id, r.message_id))
            .collect();
        let upload_seen = upload_file
            .records
            .iter()
            .map(|r| (r.file_path.clone(), r.target_chat_id))
            .collect();
        let forward_seen = forward_file
            .records
            .iter()
            .map(|r| (r.source_chat_id, r.message_id, r.target_chat_id))
            .collect();

        Ok(Self {
            download_path,
            upload_path,
            forward_path,
            download: Mutex::new(DownloadState {
                file: download_file,
                seen: download_seen,
            }),
            upload: Mutex::new(UploadState {
                file: upload_file,
                seen: upload_seen,
            }),
            forward: Mutex::new(ForwardState {
                file: forward_file,
                seen: forward_seen,
            }),
        })
    }
}

#[async_trait::async_trait]
impl HistoryPort for JsonHistoryStore {
    async fn is_downloaded(&self, source_chat_id: i64, message_id: i32) -> Result<bool, DomainError> {
        Ok(self
            .download
            .lock()
            .await
            .seen
            .contains(&(source_chat_id, message_id)))
    }

    async fn mark_downloaded(&self, record: DownloadRecord) -> Result<(), DomainError> {
        let mut state = self.download.lock().await;
        let key = (record.source_chat_id, record.message_id);
        if state.seen.contains(&key) {
            return Ok(());
        }
        state.seen.insert(key);
        state.file.records.push(DownloadEntry {
            source_chat_id: record.source_chat_id,
            message_id: record.message_id,
            timestamp: chrono::Utc::now(),
        });
        state.file.updated_at = Some(chrono::Utc::now());
        write_atomic(&self.download_path, &state.file).await
    }

    async fn is_uploaded(&self, file_path: &str, target_chat_id: i64) -> Result<bool, DomainError> {
        let key = (normalize_path(file_path), target_chat_id);
        Ok(self.upload.lock().await.seen.contains(&key))
    }

    async fn mark_uploaded(&self, record: UploadRecord) -> Result<(), DomainError> {
        let mut state = self.upload.lock().await;
        let normalized = normalize_path(&record.file_path);
        let key = (normalized.clone(), record.target_chat_id);
        if state.seen.contains(&key) {
            return Ok(());
        }
        state.seen.insert(key);
        state.file.records.push(UploadEntry {
            file_path: normalized,
            target_chat_id: record.target_chat_id,
            size: record.size,
            kind: record.kind.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });
        state.file.updated_at = Some(chrono::Utc::now());
        write_atomic(&self.upload_path, &state.file).await
    }

    async fn is_forwarded(
        &self,
        source_chat_id: i64,
        message_id: i32,
        target_chat_id: i64,
    ) -> Result<bool, DomainError> {
        let key = (source_chat_id, message_id, target_chat_id);
        Ok(self.forward.lock().await.seen.contains(&key))
    }

    async fn mark_forwarded(&self, record: ForwardRecord) -> Result<(), DomainError> {
        let mut state = self.forward.lock().await;
        let key = (
            record.source_chat_id,
            record.message_id,
            record.target_chat_id,
        );
        if state.seen.contains(&key) {
            return Ok(());
        }
        state.seen.insert(key);
        state.file.records.push(ForwardEntry {
            source_chat_id: record.source_chat_id,
            message_id: record.message_id,
            target_chat_id: record.target_chat_id,
            timestamp: chrono::Utc::now(),
        });
        state.file.updated_at = Some(chrono::Utc::now());
        write_atomic(&self.forward_path, &state.file).await
    }

    async fn downloaded_ids(&self, source_chat_id: i64) -> Result<Vec<i32>, DomainError> {
        Ok(self
            .download
            .lock()
            .await
            .seen
            .iter()
            .filter(|(chat, _)| *chat == source_chat_id)
            .map(|(_, id)| *id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn idempotent_mark_forwarded() {
        let dir = TempDir::new().unwrap();
        let store = JsonHistoryStore::open(dir.path()).await.unwrap();
        let record = ForwardRecord {
            source_chat_id: 1,
            message_id: 2,
            target_chat_id: 3,
        };
        store.mark_forwarded(record).await.unwrap();
        let first = tokio::fs::read_to_string(dir.path().join("forward_history.json"))
            .await
            .unwrap();
        store.mark_forwarded(record).await.unwrap();
        let second = tokio::fs::read_to_string(dir.path().join("forward_history.json"))
            .await
            .unwrap();
        let strip_ts = |s: &str| {
            s.lines()
                .filter(|l| !l.trim_start().starts_with("\"timestamp\"")
                    && !l.trim_start().starts_with("\"updated_at\""))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip_ts(&first), strip_ts(&second));
        assert!(store.is_forwarded(1, 2, 3).await.unwrap());
    }

    #[tokio::test]
    async fn at_most_once_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonHistoryStore::open(dir.path()).await.unwrap();
            store
                .mark_downloaded(DownloadRecord {
                    source_chat_id: 10,
                    message_id: 20,
                })
                .await
                .unwrap();
        }
        let reopened = JsonHistoryStore::open(dir.path()).await.unwrap();
        assert!(reopened.is_downloaded(10, 20).await.unwrap());
        assert_eq!(reopened.downloaded_ids(10).await.unwrap(), vec![20]);
    }

    #[tokio::test]
    async fn corrupt_file_reinitialises_empty() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("upload_history.json"), b"{not json")
            .await
            .unwrap();
        let store = JsonHistoryStore::open(dir.path()).await.unwrap();
        assert!(!store.is_uploaded("/a/b", 1).await.unwrap());
    }
}
