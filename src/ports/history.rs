//! History store port. Guarantees at-most-once delivery across restarts.

use crate::domain::{DomainError, DownloadRecord, ForwardRecord, UploadRecord};

#[async_trait::async_trait]
pub trait HistoryPort: Send + Sync {
    async fn is_downloaded(&self, source_chat_id: i64, message_id: i32) -> Result<bool, DomainError>;
    async fn mark_downloaded(&self, record: DownloadRecord) -> Result<(), DomainError>;

    async fn is_uploaded(&self, file_path: &str, target_chat_id: i64) -> Result<bool, DomainError>;
    async fn mark_uploaded(&self, record: UploadRecord) -> Result<(), DomainError>;

    async fn is_forwarded(
        &self,
        source_chat_id: i64,
        message_id: i32,
        target_chat_id: i64,
    ) -> Result<bool, DomainError>;
    async fn mark_forwarded(&self, record: ForwardRecord) -> Result<(), DomainError>;

    /// True once `message_id` has been delivered to every chat in `targets`.
    async fn is_forwarded_to_all(
        &self,
        source_chat_id: i64,
        message_id: i32,
        targets: &[i64],
    ) -> Result<bool, DomainError> {
        for &target in targets {
            if !self.is_forwarded(source_chat_id, message_id, target).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn downloaded_ids(&self, source_chat_id: i64) -> Result<Vec<i32>, DomainError>;
}
