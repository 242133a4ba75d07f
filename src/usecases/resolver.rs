//! Channel Resolver. Translates a user-supplied identifier into a
//! `ChannelRef` with caching, keyed under both the input string and the
//! resolved numeric id so either can look the entry back up. TTL re-fetch
//! and runtime capability downgrade on a forward-restricted error.

use crate::domain::{ChannelIdentifier, ChannelRef, DomainError};
use crate::ports::{ChatLookup, TgGateway};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_TTL_SECS: i64 = 3600;

pub struct ChannelResolver {
    gateway: Arc<dyn TgGateway>,
    cache: Mutex<HashMap<String, ChannelRef>>,
    ttl: chrono::Duration,
}

impl ChannelResolver {
    pub fn new(gateway: Arc<dyn TgGateway>) -> Self {
        Self {
            gateway,
            cache: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::seconds(DEFAULT_TTL_SECS),
        }
    }

    /// Pure text transformation, no I/O — exposed separately from
    /// `resolve` for callers that only need parsing.
    pub fn parse_identifier(raw: &str) -> Option<ChannelIdentifier> {
        ChannelIdentifier::parse(raw)
    }

    pub async fn resolve(&self, raw: &str) -> Result<ChannelRef, DomainError> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(raw) {
                if !entry.is_stale(self.ttl) {
                    return Ok(entry.clone());
                }
            }
        }

        let identifier = ChannelIdentifier::parse(raw)
            .ok_or_else(|| DomainError::Resolve(format!("unrecognised identifier: {raw}")))?;

        let lookup = match &identifier {
            ChannelIdentifier::Numeric(n) => ChatLookup::Id(*n),
            ChannelIdentifier::PrivateId(n) | ChannelIdentifier::PrivateMessage(n, _) => {
                ChatLookup::Id(*n)
            }
            ChannelIdentifier::Username(u)
            | ChannelIdentifier::PublicLink(u)
            | ChannelIdentifier::MessageLink(u, _) => ChatLookup::Username(u.clone()),
            ChannelIdentifier::Invite(code) => ChatLookup::Invite(code.clone()),
        };

        let info = self.gateway.resolve_chat(lookup).await?;
        let resolved = ChannelRef {
            canonical: raw.to_string(),
            id: info.id,
            username: info.username,
            title: info.title,
            can_forward: info.can_forward,
            last_checked: chrono::Utc::now(),
        };

        let mut cache = self.cache.lock().await;
        cache.insert(raw.to_string(), resolved.clone());
        cache.insert(resolved.id.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Cheap cache lookup; does not trigger a refetch.
    pub async fn forward_capability(&self, raw: &str) -> Option<bool> {
        self.cache.lock().await.get(raw).map(|r| r.can_forward)
    }

    /// Runtime downgrade: called the moment a `ChatForwardsRestricted`
    /// error comes back from a forward/copy attempt, so later groups in the
    /// same run skip straight to download-then-upload.
    pub async fn downgrade_forward_capability(&self, chat_id: i64) {
        let mut cache = self.cache.lock().await;
        let mut touched = false;
        for entry in cache.values_mut() {
            if entry.id == chat_id {
                entry.can_forward = false;
                touched = true;
            }
        }
        if touched {
            warn!(chat_id, "forward capability downgraded after restriction");
        }
    }

    pub async fn clear_expired(&self) {
        let mut cache = self.cache.lock().await;
        let ttl = self.ttl;
        let before = cache.len();
        cache.retain(|_, v| !v.is_stale(ttl));
        debug!(evicted = before - cache.len(), "resolver cache swept");
    }

    pub async fn clear_all(&self) {
        self.cache.lock().await.clear();
    }
}
