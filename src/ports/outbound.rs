//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters. `TgGateway` is the remote-API collaborator
//! contract: everything the engine needs from a Telegram-style client,
//! expressed as a trait so the use cases never see grammers types.

use crate::domain::{DomainError, DownloadedFile, Message};
use std::path::Path;
use tokio::sync::mpsc;

/// What the gateway learned about a chat when asked to resolve it.
#[derive(Debug, Clone)]
pub struct RemoteChatInfo {
    pub id: i64,
    pub username: Option<String>,
    pub title: String,
    /// False when the chat has protected content (channels) or forbids
    /// forwarding out of the group (groups' restriction flag).
    pub can_forward: bool,
}

/// How to look a chat up remotely — one arm per `ChannelIdentifier` variant
/// that requires a live lookup (`Numeric` ids still need a dialog pass to
/// recover the access hash).
#[derive(Debug, Clone)]
pub enum ChatLookup {
    Id(i64),
    Username(String),
    Invite(String),
}

#[async_trait::async_trait]
pub trait TgGateway: Send + Sync {
    async fn resolve_chat(&self, lookup: ChatLookup) -> Result<RemoteChatInfo, DomainError>;

    /// One page of history, newest-first, Telegram `GetHistory` semantics:
    /// `offset_id` is the id to page *before*; `0` starts from the newest
    /// message. `min_id`/`max_id` bound the returned window (`0` = no bound).
    async fn get_history(
        &self,
        chat_id: i64,
        offset_id: i32,
        min_id: i32,
        max_id: i32,
        limit: i32,
    ) -> Result<Vec<Message>, DomainError>;

    async fn get_messages_by_id(
        &self,
        chat_id: i64,
        ids: &[i32],
    ) -> Result<Vec<Message>, DomainError>;

    /// All members of the album `album_id` that message `anchor_id` belongs
    /// to, fetched and emitted as one atomic unit.
    async fn get_media_group(
        &self,
        chat_id: i64,
        anchor_id: i32,
        album_id: i64,
    ) -> Result<Vec<Message>, DomainError>;

    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i32,
        dest_path: &Path,
    ) -> Result<(), DomainError>;

    /// Uploads a freshly downloaded album to `chat_id`. Returns the ids of
    /// the sent messages, in the same order as `files`, for subsequent
    /// server-side copy.
    async fn send_media_group(
        &self,
        chat_id: i64,
        files: &[DownloadedFile],
        caption: Option<&str>,
    ) -> Result<Vec<i32>, DomainError>;

    /// Uploads a single message (file optional — a final text-only message
    /// counts as a single send too).
    async fn send_single(
        &self,
        chat_id: i64,
        file: Option<&DownloadedFile>,
        caption: Option<&str>,
    ) -> Result<i32, DomainError>;

    /// Native forward, preserving "forwarded from" attribution. Returns
    /// `DomainError::ForwardRestricted` when the source has protected
    /// content.
    async fn forward_messages(
        &self,
        source_chat_id: i64,
        message_ids: &[i32],
        target_chat_id: i64,
    ) -> Result<Vec<i32>, DomainError>;

    /// Server-side copy of a single message, without attribution.
    async fn copy_message(
        &self,
        from_chat_id: i64,
        message_id: i32,
        to_chat_id: i64,
    ) -> Result<i32, DomainError>;

    /// Server-side copy of an album.
    async fn copy_media_group(
        &self,
        from_chat_id: i64,
        message_ids: &[i32],
        to_chat_id: i64,
    ) -> Result<Vec<i32>, DomainError>;

    /// Subscribes to new incoming messages for the given chats. The
    /// returned receiver yields one `Message` per event for the life of the
    /// subscription (dropping it unsubscribes).
    async fn subscribe_updates(
        &self,
        chat_ids: Vec<i64>,
    ) -> Result<mpsc::Receiver<Message>, DomainError>;
}
