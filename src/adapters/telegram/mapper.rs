//! Maps grammers TL types to domain entities: match on the raw TL enum,
//! return `None` for anything that isn't a real message, extended with
//! album (`grouped_id`) and media-kind extraction over the supported
//! media-type vocabulary.

use crate::domain::{MediaDescriptor, MediaKind, Message};
use grammers_client::tl;

/// Maps one `messages.Message` TL value to a domain `Message`. Returns
/// `None` for `Empty`/`Service` variants, which carry no content the
/// pipeline can act on.
pub fn message_to_domain(msg: &tl::enums::Message, chat_id: i64) -> Option<Message> {
    let m = match msg {
        tl::enums::Message::Message(m) => m,
        tl::enums::Message::Empty(_) | tl::enums::Message::Service(_) => return None,
    };

    let caption = m.message.trim();
    let caption = if caption.is_empty() {
        None
    } else {
        Some(caption.to_string())
    };

    Some(Message {
        id: m.id,
        chat_id,
        date: chrono::DateTime::from_timestamp(m.date as i64, 0).unwrap_or_else(chrono::Utc::now),
        caption,
        media: m.media.as_ref().and_then(media_descriptor),
        album_id: m.grouped_id,
    })
}

fn media_descriptor(media: &tl::enums::MessageMedia) -> Option<MediaDescriptor> {
    match media {
        tl::enums::MessageMedia::Photo(_) => Some(MediaDescriptor {
            kind: MediaKind::Photo,
            mime_type: None,
        }),
        tl::enums::MessageMedia::Document(d) => {
            let doc = match d.document.as_ref()? {
                tl::enums::Document::Document(doc) => doc,
                _ => return None,
            };
            let mime = doc.mime_type.clone();
            let kind = if mime.starts_with("video/") {
                if doc
                    .attributes
                    .iter()
                    .any(|a| matches!(a, tl::enums::DocumentAttribute::Animated))
                {
                    MediaKind::Animation
                } else {
                    MediaKind::Video
                }
            } else if mime.starts_with("audio/") {
                MediaKind::Audio
            } else {
                MediaKind::Document
            };
            Some(MediaDescriptor {
                kind,
                mime_type: Some(mime),
            })
        }
        _ => None,
    }
}

/// Reads the "protected content" flag off a resolved channel/chat, which
/// the resolver uses to populate `ChannelRef::can_forward`.
pub fn can_forward_from_chat(chat: &tl::enums::Chat) -> bool {
    match chat {
        tl::enums::Chat::Channel(c) => !c.noforwards,
        tl::enums::Chat::Chat(c) => !c.noforwards,
        _ => true,
    }
}
