//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod identifier;
pub mod task;

pub use entities::{
    ChannelPair, ChannelRef, DownloadRecord, DownloadedFile, ForwardRecord, MediaDescriptor,
    MediaGroup, MediaKind, Message, PairPolicy, UploadRecord,
};
pub use errors::DomainError;
pub use identifier::ChannelIdentifier;
pub use task::{CancelToken, PauseToken, Task, TaskKind, TaskStatus};
