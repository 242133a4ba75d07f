//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these. Kinds follow the error
//! taxonomy the engine propagates by, not by concrete type name: each
//! variant corresponds to one of the pipeline boundaries that decide
//! whether to retry, skip, or fail the containing task.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("telegram gateway error: {0}")]
    Gateway(String),

    /// Wait-required (FloodWait) error. Callers normally never see this —
    /// the rate-limit handler retries internally — but it escapes once
    /// `max_retries` is exhausted.
    #[error("flood wait: retry after {seconds}s")]
    WaitRequired { seconds: u64 },

    /// A forward or copy primitive was rejected because the source has
    /// protected content, or because the target forbids incoming forwards.
    #[error("forwards restricted on this chat")]
    ForwardRestricted,

    #[error("could not resolve channel identifier: {0}")]
    Resolve(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("history store error: {0}")]
    History(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Fatal(String),
}

impl DomainError {
    /// Whether a user retry of the failing operation is plausibly meaningful,
    /// for the `recoverable` flag on the §4.7 error callback.
    pub fn recoverable(&self) -> bool {
        !matches!(self, DomainError::Fatal(_) | DomainError::Auth(_))
    }
}
