//! Port traits. API boundaries for the hexagon.
//!
//! - Outbound: called by the application into infrastructure.

pub mod auth;
pub mod history;
pub mod outbound;
pub mod progress;
pub mod video;

pub use auth::{AuthPort, SignInResult};
pub use history::HistoryPort;
pub use outbound::{ChatLookup, RemoteChatInfo, TgGateway};
pub use progress::{ProgressSink, TracingProgressSink};
pub use video::{VideoPort, VideoThumbnail};
