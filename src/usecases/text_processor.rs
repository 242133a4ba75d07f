//! Caption keyword filter, text replacement and caption removal, applied
//! in that fixed order to a `MediaGroup`'s caption before the group
//! reaches the download worker.

use crate::domain::{MediaGroup, PairPolicy};

/// Outcome of running a group's caption through the text processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextProcessingOutcome {
    /// The group passes the keyword filter (or no filter is configured).
    /// `replaced` records whether any text-replacement rule fired, for
    /// stats/logging purposes.
    Keep { caption: Option<String>, replaced: bool },
    /// No keyword in the pair's list occurs in the caption; the group is
    /// dropped and counted as "filtered" by the caller.
    Filtered,
}

/// Applies, in order: keyword filter, ordered text replacement, caption
/// removal. Captions are matched case-insensitively for the keyword step;
/// replacement and removal operate on the literal text.
pub fn process(policy: &PairPolicy, caption: Option<&str>) -> TextProcessingOutcome {
    if !policy.keywords.is_empty() {
        let matches = caption
            .map(|c| {
                let lower = c.to_lowercase();
                policy
                    .keywords
                    .iter()
                    .any(|kw| lower.contains(&kw.to_lowercase()))
            })
            .unwrap_or(false);
        if !matches {
            return TextProcessingOutcome::Filtered;
        }
    }

    let mut text = caption.map(String::from);
    let mut replaced = false;
    if let Some(ref mut t) = text {
        for (from, to) in &policy.text_replacements {
            if t.contains(from.as_str()) {
                *t = t.replace(from, to);
                replaced = true;
            }
        }
    }

    if policy.remove_captions {
        text = None;
    }

    TextProcessingOutcome::Keep { caption: text, replaced }
}

/// Extracts the first non-empty caption among a group's members, by
/// ascending message id, so it survives reassembly — an album's caption
/// otherwise lives only on one of its individual messages.
pub fn extract_group_caption(group: &MediaGroup) -> Option<String> {
    group
        .messages
        .iter()
        .filter_map(|m| m.caption.as_deref())
        .find(|c| !c.trim().is_empty())
        .map(String::from)
}

/// Runs the processor against a group and returns the caption to carry
/// forward, or `None` if the group should be dropped.
pub fn process_group(policy: &PairPolicy, group: &MediaGroup) -> Option<Option<String>> {
    let caption = extract_group_caption(group);
    match process(policy, caption.as_deref()) {
        TextProcessingOutcome::Filtered => None,
        TextProcessingOutcome::Keep { caption, .. } => Some(caption),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelRef, MediaGroup, Message};

    fn policy(keywords: &[&str], replacements: &[(&str, &str)], remove_captions: bool) -> PairPolicy {
        PairPolicy {
            media_kinds: vec![],
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            text_replacements: replacements
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
            remove_captions,
            final_message_html: None,
        }
    }

    #[test]
    fn keyword_filter_drops_non_matching_caption() {
        let p = policy(&["foo", "bar"], &[], false);
        assert_eq!(process(&p, Some("nothing here")), TextProcessingOutcome::Filtered);
    }

    #[test]
    fn keyword_filter_keeps_matching_caption_and_applies_replacement() {
        let p = policy(&["foo", "bar"], &[("foo", "FOO")], false);
        assert_eq!(
            process(&p, Some("foo bar")),
            TextProcessingOutcome::Keep {
                caption: Some("FOO bar".to_string()),
                replaced: true,
            }
        );
    }

    #[test]
    fn remove_captions_applies_after_keyword_match() {
        let p = policy(&["foo"], &[], true);
        assert_eq!(
            process(&p, Some("foo bar")),
            TextProcessingOutcome::Keep { caption: None, replaced: false }
        );
    }

    #[test]
    fn replacements_apply_in_declared_order() {
        let p = policy(&[], &[("a", "b"), ("b", "c")], false);
        assert_eq!(
            process(&p, Some("a")),
            TextProcessingOutcome::Keep { caption: Some("c".to_string()), replaced: true }
        );
    }

    #[test]
    fn extract_group_caption_picks_lowest_id_non_empty() {
        let source = ChannelRef {
            canonical: "@alpha".into(),
            id: 1,
            username: Some("alpha".into()),
            title: "Alpha".into(),
            can_forward: true,
            last_checked: chrono::Utc::now(),
        };
        let group = MediaGroup {
            source,
            messages: vec![
                Message { id: 1, chat_id: 1, date: chrono::Utc::now(), caption: None, media: None, album_id: Some(9) },
                Message { id: 2, chat_id: 1, date: chrono::Utc::now(), caption: Some("hello".into()), media: None, album_id: Some(9) },
            ],
            caption: None,
            files: vec![],
            temp_dir: "/tmp/x".into(),
        };
        assert_eq!(extract_group_caption(&group), Some("hello".to_string()));
    }
}
