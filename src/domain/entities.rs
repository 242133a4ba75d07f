//! Domain entities. Pure data structures for the core business logic.
//!
//! No Telegram/IO types here — these are mapped from adapters.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::identifier::ChannelIdentifier;

/// A resolved channel: canonical identifier as supplied, plus the remote
/// API's stable numeric id and forwarding capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Exactly as the user typed it (or as loaded from config).
    pub canonical: String,
    pub id: i64,
    pub username: Option<String>,
    pub title: String,
    /// False when the chat has protected content, or (for groups) the
    /// forward-restriction flag is set. Native forward/copy is skipped
    /// when false.
    pub can_forward: bool,
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

impl ChannelRef {
    pub fn is_stale(&self, ttl: chrono::Duration) -> bool {
        chrono::Utc::now() - self.last_checked > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Animation,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
            MediaKind::Animation => "animation",
        }
    }
}

/// One message as seen through the engine. Never mutated once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    pub chat_id: i64,
    pub date: chrono::DateTime<chrono::Utc>,
    pub caption: Option<String>,
    pub media: Option<MediaDescriptor>,
    /// Telegram's `grouped_id`; present iff the message belongs to an album.
    pub album_id: Option<i64>,
}

/// What the remote client needs to later fetch/download this message's
/// media; opaque to everything except the gateway adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub mime_type: Option<String>,
}

/// 2..=10 messages sharing an album id, assembled into one pipeline unit.
#[derive(Debug, Clone)]
pub struct MediaGroup {
    pub source: ChannelRef,
    /// Sorted ascending by message id.
    pub messages: Vec<Message>,
    /// First non-empty caption among the members, by ascending id.
    pub caption: Option<String>,
    pub files: Vec<DownloadedFile>,
    /// Filesystem-safe directory this group's files live under.
    pub temp_dir: PathBuf,
}

impl MediaGroup {
    pub fn album_id(&self) -> Option<i64> {
        self.messages.first().and_then(|m| m.album_id)
    }

    pub fn lowest_message_id(&self) -> Option<i32> {
        self.messages.iter().map(|m| m.id).min()
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub message_id: i32,
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
    pub thumbnail: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
}

/// (source channel id, message id, target channel id); presence means
/// "already delivered".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub source_chat_id: i64,
    pub message_id: i32,
    pub target_chat_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub source_chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Normalised local path — part of the dedup key, together with
    /// `target_chat_id`.
    pub file_path: String,
    pub target_chat_id: i64,
    pub size: u64,
    pub kind: MediaKind,
}

/// Per-pair forwarding policy: which media kinds pass the filter, which
/// keywords must appear, which text substitutions apply, and whether a
/// caption-only closing message gets sent once a pair finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairPolicy {
    #[serde(default)]
    pub media_kinds: Vec<MediaKind>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Ordered `original -> replacement` substitutions, applied in
    /// declaration order: each rule operates on the text already rewritten
    /// by the rules before it (see DESIGN.md).
    #[serde(default)]
    pub text_replacements: Vec<(String, String)>,
    #[serde(default)]
    pub remove_captions: bool,
    pub final_message_html: Option<String>,
}

impl PairPolicy {
    pub fn allows(&self, kind: MediaKind) -> bool {
        self.media_kinds.is_empty() || self.media_kinds.contains(&kind)
    }
}

/// One configured `(source, targets, policy)` triple.
#[derive(Debug, Clone)]
pub struct ChannelPair {
    pub name: String,
    pub source: ChannelIdentifier,
    pub targets: Vec<ChannelIdentifier>,
    pub policy: PairPolicy,
    pub start_id: i32,
    pub end_id: Option<i32>,
}
