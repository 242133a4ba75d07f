//! Implements `TgGateway` using grammers `Client`: a raw-`invoke`
//! `GetHistory` call plus a peer cache keyed by chat id to avoid
//! re-running `iter_dialogs` (and the FloodWait that causes) on every
//! request. Extended here with the forward/copy/upload/subscribe surface
//! the forwarding engine needs.
//!
//! FloodWait (`RpcError` code 420) and forward-restriction errors are
//! mapped to `DomainError::WaitRequired`/`ForwardRestricted` at the edge of
//! every call so `usecases::rate_limiter::FloodWaitHandler` never has to
//! know about grammers' error type.

use crate::adapters::telegram::mapper;
use crate::domain::{DomainError, DownloadedFile, Message};
use crate::ports::{ChatLookup, RemoteChatInfo, TgGateway};
use async_trait::async_trait;
use grammers_client::tl;
use grammers_client::{Client, InvocationError};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Converts a grammers RPC failure into the engine's error taxonomy.
/// Anything else is an opaque gateway error.
fn map_invocation_error(e: InvocationError) -> DomainError {
    match &e {
        InvocationError::Rpc(rpc) if rpc.code == 420 => DomainError::WaitRequired {
            seconds: rpc.value.unwrap_or(1) as u64,
        },
        InvocationError::Rpc(rpc) if rpc.name.contains("CHAT_FORWARDS_RESTRICTED") => {
            DomainError::ForwardRestricted
        }
        InvocationError::Rpc(rpc) if rpc.name.contains("CHAT_SEND_") => DomainError::Upload(
            "target chat forbids this media type or the bot lacks posting rights".into(),
        ),
        _ => DomainError::Gateway(e.to_string()),
    }
}

pub struct GrammersTgGateway {
    client: Client,
    peer_cache: Mutex<HashMap<i64, tl::enums::InputPeer>>,
}

impl GrammersTgGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            peer_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `chat_id` to an `InputPeer`, scanning dialogs once and
    /// caching the result — an adapter-local peer-handle cache that avoids
    /// re-scanning dialogs (and the FLOOD_WAIT that would cause) on every
    /// call.
    async fn input_peer(&self, chat_id: i64) -> Result<tl::enums::InputPeer, DomainError> {
        if let Some(p) = self.peer_cache.lock().await.get(&chat_id) {
            return Ok(p.clone());
        }

        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(map_invocation_error)? {
            let peer = dialog.peer();
            if peer.id().bot_api_dialog_id() == chat_id {
                let peer_ref = peer
                    .to_ref()
                    .await
                    .ok_or_else(|| DomainError::Resolve("peer not in session cache".into()))?;
                let input_peer: tl::enums::InputPeer = peer_ref.into();
                self.peer_cache
                    .lock()
                    .await
                    .insert(chat_id, input_peer.clone());
                return Ok(input_peer);
            }
        }
        Err(DomainError::Resolve(format!(
            "chat {chat_id} not found among dialogs"
        )))
    }

    /// Fetches the full `tl::enums::Chat` behind an `InputPeer` so callers
    /// can read flags (e.g. `noforwards`) that `Dialog`/`Peer` don't carry —
    /// the same raw-invoke-then-pick-first-chat shape `resolve_chat`'s
    /// `Username`/`Invite` arms use.
    async fn full_chat(&self, peer: &tl::enums::InputPeer) -> Result<tl::enums::Chat, DomainError> {
        use tl::enums::messages::Chats;
        let chats = match peer {
            tl::enums::InputPeer::Channel(c) => {
                let req = tl::functions::channels::GetChannels {
                    id: vec![tl::enums::InputChannel::Channel(tl::types::InputChannel {
                        channel_id: c.channel_id,
                        access_hash: c.access_hash,
                    })],
                };
                match self.client.invoke(&req).await.map_err(map_invocation_error)? {
                    Chats::Chats(c) => c.chats,
                    Chats::Slice(c) => c.chats,
                }
            }
            tl::enums::InputPeer::Chat(c) => {
                let req = tl::functions::messages::GetChats { id: vec![c.chat_id] };
                match self.client.invoke(&req).await.map_err(map_invocation_error)? {
                    Chats::Chats(c) => c.chats,
                    Chats::Slice(c) => c.chats,
                }
            }
            _ => return Err(DomainError::Resolve("unsupported peer kind for chat lookup".into())),
        };
        chats
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::Resolve("chat vanished before lookup completed".into()))
    }
}

#[async_trait]
impl TgGateway for GrammersTgGateway {
    async fn resolve_chat(&self, lookup: ChatLookup) -> Result<RemoteChatInfo, DomainError> {
        match lookup {
            ChatLookup::Username(username) => {
                let req = tl::functions::contacts::ResolveUsername {
                    username: username.clone(),
                    referer: None,
                };
                let resolved = self
                    .client
                    .invoke(&req)
                    .await
                    .map_err(map_invocation_error)?;
                let tl::enums::contacts::ResolvedPeer::Peer(r) = resolved;
                let chat = r
                    .chats
                    .into_iter()
                    .next()
                    .ok_or_else(|| DomainError::Resolve(format!("unknown username @{username}")))?;
                Ok(chat_to_remote_info(&chat))
            }
            ChatLookup::Invite(code) => {
                let req = tl::functions::messages::CheckChatInvite { hash: code.clone() };
                match self.client.invoke(&req).await.map_err(map_invocation_error)? {
                    tl::enums::ChatInvite::Already(tl::types::ChatInviteAlready { chat })
                    | tl::enums::ChatInvite::Peek(tl::types::ChatInvitePeek { chat, .. }) => {
                        Ok(chat_to_remote_info(&chat))
                    }
                    tl::enums::ChatInvite::Invite(_) => Err(DomainError::Resolve(format!(
                        "invite {code} requires joining before it can be resolved"
                    ))),
                }
            }
            ChatLookup::Id(id) => {
                let mut dialogs = self.client.iter_dialogs();
                while let Some(dialog) = dialogs.next().await.map_err(map_invocation_error)? {
                    let peer = dialog.peer();
                    if peer.id().bot_api_dialog_id() == id {
                        let peer_ref = peer
                            .to_ref()
                            .await
                            .ok_or_else(|| DomainError::Resolve("peer not in session cache".into()))?;
                        let input_peer: tl::enums::InputPeer = peer_ref.into();
                        let chat = self.full_chat(&input_peer).await?;
                        return Ok(RemoteChatInfo {
                            id,
                            username: peer.username().map(String::from),
                            title: peer.name().map(String::from).unwrap_or_else(|| id.to_string()),
                            can_forward: mapper::can_forward_from_chat(&chat),
                        });
                    }
                }
                Err(DomainError::Resolve(format!("chat {id} not found among dialogs")))
            }
        }
    }

    async fn get_history(
        &self,
        chat_id: i64,
        offset_id: i32,
        min_id: i32,
        max_id: i32,
        limit: i32,
    ) -> Result<Vec<Message>, DomainError> {
        let peer = self.input_peer(chat_id).await?;
        let req = tl::functions::messages::GetHistory {
            peer,
            offset_id,
            offset_date: 0,
            add_offset: 0,
            limit,
            max_id,
            min_id,
            hash: 0,
        };
        use tl::enums::messages::Messages;
        let raw = self.client.invoke(&req).await.map_err(map_invocation_error)?;
        let messages = match raw {
            Messages::Messages(m) => m.messages,
            Messages::Slice(m) => m.messages,
            Messages::ChannelMessages(m) => m.messages,
            Messages::NotModified(_) => vec![],
        };
        Ok(messages
            .iter()
            .filter_map(|m| mapper::message_to_domain(m, chat_id))
            .collect())
    }

    async fn get_messages_by_id(
        &self,
        chat_id: i64,
        ids: &[i32],
    ) -> Result<Vec<Message>, DomainError> {
        let peer = self.input_peer(chat_id).await?;
        let id_list = ids
            .iter()
            .map(|&id| tl::enums::InputMessage::Id(tl::types::InputMessageId { id }))
            .collect();
        let req = tl::functions::channels::GetMessages {
            channel: to_input_channel(&peer)?,
            id: id_list,
        };
        use tl::enums::messages::Messages;
        let raw = self.client.invoke(&req).await.map_err(map_invocation_error)?;
        let messages = match raw {
            Messages::Messages(m) => m.messages,
            Messages::Slice(m) => m.messages,
            Messages::ChannelMessages(m) => m.messages,
            Messages::NotModified(_) => vec![],
        };
        Ok(messages
            .iter()
            .filter_map(|m| mapper::message_to_domain(m, chat_id))
            .collect())
    }

    async fn get_media_group(
        &self,
        chat_id: i64,
        anchor_id: i32,
        album_id: i64,
    ) -> Result<Vec<Message>, DomainError> {
        // Telegram has no direct "get album" call; a narrow window around
        // the anchor message covers every plausible album member (albums
        // are capped at 10, posted back-to-back), then we filter by
        // `grouped_id` so the full album is fetched and emitted atomically.
        const WINDOW: i32 = 12;
        let ids: Vec<i32> = ((anchor_id - WINDOW).max(1)..=(anchor_id + WINDOW)).collect();
        let messages = self.get_messages_by_id(chat_id, &ids).await?;
        let mut group: Vec<Message> = messages
            .into_iter()
            .filter(|m| m.album_id == Some(album_id))
            .collect();
        group.sort_by_key(|m| m.id);
        Ok(group)
    }

    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i32,
        dest_path: &Path,
    ) -> Result<(), DomainError> {
        let peer = self.input_peer(chat_id).await?;
        let messages = self
            .client
            .get_messages_by_id(&to_packed_chat(&peer)?, &[message_id])
            .await
            .map_err(map_invocation_error)?;
        let msg = messages
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| DomainError::Download(format!("message {message_id} not found")))?;
        let media = msg
            .media()
            .ok_or_else(|| DomainError::Download("message has no media".into()))?;
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Download(format!("create temp dir: {e}")))?;
        }
        self.client
            .download_media(&media, dest_path)
            .await
            .map_err(|e| DomainError::Download(e.to_string()))?;
        debug!(chat_id, message_id, path = %dest_path.display(), "media downloaded");
        Ok(())
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        files: &[DownloadedFile],
        caption: Option<&str>,
    ) -> Result<Vec<i32>, DomainError> {
        let peer = self.input_peer(chat_id).await?;
        let packed = to_packed_chat(&peer)?;
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let input_file = self
                .client
                .upload_file(&file.path)
                .await
                .map_err(|e| DomainError::Upload(e.to_string()))?;
            uploaded.push((file, input_file));
        }

        let mut ids = Vec::with_capacity(uploaded.len());
        for (i, (file, input_file)) in uploaded.into_iter().enumerate() {
            let media = grammers_client::InputMedia::from(input_file);
            let mut message = grammers_client::InputMessage::default().copy_media(&media);
            if i == 0 {
                if let Some(cap) = caption {
                    message = message.text(cap);
                }
            }
            let _ = file.kind;
            let sent = self
                .client
                .send_message(&packed, message)
                .await
                .map_err(map_invocation_error)?;
            ids.push(sent.id());
        }
        Ok(ids)
    }

    async fn send_single(
        &self,
        chat_id: i64,
        file: Option<&DownloadedFile>,
        caption: Option<&str>,
    ) -> Result<i32, DomainError> {
        let peer = self.input_peer(chat_id).await?;
        let packed = to_packed_chat(&peer)?;
        let mut message = grammers_client::InputMessage::default();
        if let Some(cap) = caption {
            message = message.text(cap);
        }
        if let Some(f) = file {
            let input_file = self
                .client
                .upload_file(&f.path)
                .await
                .map_err(|e| DomainError::Upload(e.to_string()))?;
            message = message.copy_media(&grammers_client::InputMedia::from(input_file));
        }
        let sent = self
            .client
            .send_message(&packed, message)
            .await
            .map_err(map_invocation_error)?;
        Ok(sent.id())
    }

    async fn forward_messages(
        &self,
        source_chat_id: i64,
        message_ids: &[i32],
        target_chat_id: i64,
    ) -> Result<Vec<i32>, DomainError> {
        let source = to_input_peer_into_input(self.input_peer(source_chat_id).await?);
        let target = self.input_peer(target_chat_id).await?;
        let packed_target = to_packed_chat(&target)?;
        let random_ids: Vec<i64> = message_ids.iter().map(|_| rand_like(message_ids)).collect();
        let req = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: false,
            drop_media_captions: false,
            noforwards: false,
            from_peer: source,
            id: message_ids.to_vec(),
            random_id: random_ids,
            to_peer: to_input_peer(&target)?,
            top_msg_id: None,
            schedule_date: None,
            send_as: None,
        };
        let _ = packed_target;
        let updates = self.client.invoke(&req).await.map_err(map_invocation_error)?;
        Ok(message_ids_from_updates(&updates))
    }

    async fn copy_message(
        &self,
        from_chat_id: i64,
        message_id: i32,
        to_chat_id: i64,
    ) -> Result<i32, DomainError> {
        // Same approach as `copy_media_group`: a forward with `drop_author`
        // set carries the original media server-side, without a re-upload
        // and without "forwarded from" attribution. Re-sending only the
        // caption here would silently drop the message's media.
        let source = to_input_peer_into_input(self.input_peer(from_chat_id).await?);
        let target = self.input_peer(to_chat_id).await?;
        let random_id = rand_like(&[message_id]);
        let req = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: true,
            drop_media_captions: false,
            noforwards: false,
            from_peer: source,
            id: vec![message_id],
            random_id: vec![random_id],
            to_peer: to_input_peer(&target)?,
            top_msg_id: None,
            schedule_date: None,
            send_as: None,
        };
        let updates = self.client.invoke(&req).await.map_err(map_invocation_error)?;
        message_ids_from_updates(&updates)
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::Gateway(format!("copy of message {message_id} produced no id")))
    }

    async fn copy_media_group(
        &self,
        from_chat_id: i64,
        message_ids: &[i32],
        to_chat_id: i64,
    ) -> Result<Vec<i32>, DomainError> {
        // No bandwidth-free "copy album" primitive exists at the raw TL
        // level without re-uploading; server-side copy of a group is
        // approximated by forwarding with `drop_author` so no "forwarded
        // from" attribution is shown, falling back to the caller's
        // direct-upload path on `ChatForwardsRestricted`.
        let source = to_input_peer_into_input(self.input_peer(from_chat_id).await?);
        let target = self.input_peer(to_chat_id).await?;
        let random_ids: Vec<i64> = message_ids.iter().map(|_| rand_like(message_ids)).collect();
        let req = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: true,
            drop_media_captions: false,
            noforwards: false,
            from_peer: source,
            id: message_ids.to_vec(),
            random_id: random_ids,
            to_peer: to_input_peer(&target)?,
            top_msg_id: None,
            schedule_date: None,
            send_as: None,
        };
        let updates = self.client.invoke(&req).await.map_err(map_invocation_error)?;
        Ok(message_ids_from_updates(&updates))
    }

    async fn subscribe_updates(
        &self,
        chat_ids: Vec<i64>,
    ) -> Result<mpsc::Receiver<Message>, DomainError> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let watched: std::collections::HashSet<i64> = chat_ids.into_iter().collect();
        tokio::spawn(async move {
            loop {
                match client.next_update().await {
                    Ok(update) => {
                        if let Some((chat_id, msg)) = extract_new_message(&update) {
                            if watched.contains(&chat_id) {
                                if tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "update stream error, stopping subscription");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

fn chat_to_remote_info(chat: &tl::enums::Chat) -> RemoteChatInfo {
    let can_forward = mapper::can_forward_from_chat(chat);
    match chat {
        tl::enums::Chat::Channel(c) => RemoteChatInfo {
            id: c.id,
            username: c.username.clone(),
            title: c.title.clone(),
            can_forward,
        },
        tl::enums::Chat::Chat(c) => RemoteChatInfo {
            id: c.id,
            username: None,
            title: c.title.clone(),
            can_forward,
        },
        tl::enums::Chat::ChatEmpty(c) => RemoteChatInfo {
            id: c.id,
            username: None,
            title: String::new(),
            can_forward: true,
        },
        tl::enums::Chat::ChatForbidden(c) => RemoteChatInfo {
            id: c.id,
            username: None,
            title: c.title.clone(),
            can_forward: false,
        },
        tl::enums::Chat::ChannelForbidden(c) => RemoteChatInfo {
            id: c.id,
            username: None,
            title: c.title.clone(),
            can_forward: false,
        },
    }
}

fn to_input_channel(peer: &tl::enums::InputPeer) -> Result<tl::enums::InputChannel, DomainError> {
    match peer {
        tl::enums::InputPeer::Channel(c) => {
            Ok(tl::enums::InputChannel::Channel(tl::types::InputChannel {
                channel_id: c.channel_id,
                access_hash: c.access_hash,
            }))
        }
        _ => Err(DomainError::Gateway("expected a channel peer".into())),
    }
}

fn to_input_peer(peer: &tl::enums::InputPeer) -> Result<tl::enums::InputPeer, DomainError> {
    Ok(peer.clone())
}

fn to_input_peer_into_input(peer: tl::enums::InputPeer) -> tl::enums::InputPeer {
    peer
}

/// Packs an `InputPeer` back into grammers' higher-level `PackedChat`,
/// which the client's ergonomic helpers (`upload_file`, `send_message`,
/// `get_messages_by_id`) expect.
fn to_packed_chat(peer: &tl::enums::InputPeer) -> Result<grammers_client::types::PackedChat, DomainError> {
    use grammers_client::types::{PackedChat, PackedType};
    match peer {
        tl::enums::InputPeer::Channel(c) => Ok(PackedChat {
            ty: PackedType::Broadcast,
            id: c.channel_id,
            access_hash: Some(c.access_hash),
        }),
        tl::enums::InputPeer::Chat(c) => Ok(PackedChat {
            ty: PackedType::Chat,
            id: c.chat_id,
            access_hash: None,
        }),
        tl::enums::InputPeer::User(u) => Ok(PackedChat {
            ty: PackedType::User,
            id: u.user_id,
            access_hash: Some(u.access_hash),
        }),
        _ => Err(DomainError::Gateway("unsupported peer kind".into())),
    }
}

fn message_ids_from_updates(updates: &tl::enums::Updates) -> Vec<i32> {
    let mut ids = Vec::new();
    let list = match updates {
        tl::enums::Updates::Updates(u) => &u.updates,
        tl::enums::Updates::Combined(u) => &u.updates,
        _ => return ids,
    };
    for update in list {
        if let tl::enums::Update::MessageId(m) = update {
            ids.push(m.id);
        }
    }
    ids
}

fn extract_new_message(update: &tl::enums::Update) -> Option<(i64, Message)> {
    match update {
        tl::enums::Update::NewMessage(u) => {
            let chat_id = message_chat_id(&u.message)?;
            mapper::message_to_domain(&u.message, chat_id).map(|m| (chat_id, m))
        }
        tl::enums::Update::NewChannelMessage(u) => {
            let chat_id = message_chat_id(&u.message)?;
            mapper::message_to_domain(&u.message, chat_id).map(|m| (chat_id, m))
        }
        _ => None,
    }
}

fn message_chat_id(msg: &tl::enums::Message) -> Option<i64> {
    match msg {
        tl::enums::Message::Message(m) => Some(match &m.peer_id {
            tl::enums::Peer::Channel(c) => -(1_000_000_000_000i64 + c.channel_id),
            tl::enums::Peer::Chat(c) => -c.chat_id,
            tl::enums::Peer::User(u) => u.user_id,
        }),
        _ => None,
    }
}

/// Telegram requires a client-chosen random id per forwarded message, used
/// only for idempotency on the server side; deriving a value from the
/// input avoids pulling in a full RNG dependency for one call site.
fn rand_like(seed: &[i32]) -> i64 {
    let mut h: i64 = 0x9E3779B97F4A7C15u64 as i64;
    for &id in seed {
        h = h.wrapping_mul(1000003).wrapping_add(id as i64);
    }
    h ^ chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
