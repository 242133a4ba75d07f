//! Channel identifier parsing: usernames, public/private links, invite
//! hashes, and numeric chat ids, modelled as a tagged variant rather than a
//! bag of optional fields.
//!
//! A fixed list of compiled regexes is tried in priority order; first
//! match wins.

use once_cell::sync::Lazy;
use regex::Regex;

/// One of the accepted forms of a user-supplied channel identifier.
/// The resolver (`usecases::resolver`) is the only consumer that performs
/// I/O on the parsed value; parsing itself is pure text transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelIdentifier {
    Numeric(i64),
    Username(String),
    PublicLink(String),
    MessageLink(String, i32),
    PrivateId(i64),
    PrivateMessage(i64, i32),
    Invite(String),
}

static RE_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());
static RE_AT_USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([A-Za-z][A-Za-z0-9_]{3,31})$").unwrap());
static RE_BARE_USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]{3,31})$").unwrap());
static RE_INVITE_SHORTHAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+([A-Za-z0-9_-]+)$").unwrap());
static RE_TME_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:https?://)?(?:www\.)?t\.me/(.+)$").unwrap());
static RE_PRIVATE_MESSAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^c/(\d+)/(\d+)$").unwrap());
static RE_PRIVATE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^c/(\d+)$").unwrap());
static RE_INVITE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+([A-Za-z0-9_-]+)$").unwrap());
static RE_JOINCHAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^joinchat/([A-Za-z0-9_-]+)$").unwrap());
static RE_MESSAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]{3,31})/(\d+)$").unwrap());
static RE_PUBLIC_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]{3,31})$").unwrap());

impl ChannelIdentifier {
    /// Parses a user-supplied string. Recognised forms, tried in priority
    /// order: numeric id; `@username`; bare `username`; `t.me/+code` /
    /// `+code` invite link; `t.me/c/<id>/<n>` private message link;
    /// `t.me/c/<id>` private link; `t.me/<username>/<n>` message link;
    /// `t.me/<username>` public link.
    ///
    /// Returns `None` if nothing matches; the resolver turns that into a
    /// `ResolveError` rather than guessing.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();

        if let Some(c) = RE_NUMERIC.captures(s) {
            return c[0].parse().ok().map(ChannelIdentifier::Numeric);
        }
        if let Some(c) = RE_AT_USERNAME.captures(s) {
            return Some(ChannelIdentifier::Username(c[1].to_string()));
        }
        if let Some(c) = RE_INVITE_SHORTHAND.captures(s) {
            return Some(ChannelIdentifier::Invite(c[1].to_string()));
        }
        if let Some(tme) = RE_TME_PATH.captures(s) {
            let path = tme[1].trim_start_matches('/');
            if let Some(c) = RE_PRIVATE_MESSAGE.captures(path) {
                let id: i64 = c[1].parse().ok()?;
                let msg: i32 = c[2].parse().ok()?;
                return Some(ChannelIdentifier::PrivateMessage(id, msg));
            }
            if let Some(c) = RE_PRIVATE_ID.captures(path) {
                let id: i64 = c[1].parse().ok()?;
                return Some(ChannelIdentifier::PrivateId(id));
            }
            if let Some(c) = RE_INVITE_PATH.captures(path) {
                return Some(ChannelIdentifier::Invite(c[1].to_string()));
            }
            if let Some(c) = RE_JOINCHAT.captures(path) {
                return Some(ChannelIdentifier::Invite(c[1].to_string()));
            }
            if let Some(c) = RE_MESSAGE_LINK.captures(path) {
                let msg: i32 = c[2].parse().ok()?;
                return Some(ChannelIdentifier::MessageLink(c[1].to_string(), msg));
            }
            if let Some(c) = RE_PUBLIC_LINK.captures(path) {
                return Some(ChannelIdentifier::PublicLink(c[1].to_string()));
            }
            return None;
        }
        if let Some(c) = RE_BARE_USERNAME.captures(s) {
            return Some(ChannelIdentifier::Username(c[1].to_string()));
        }
        None
    }

    /// Canonical string form. Inverse of `parse` for every variant this
    /// type can hold — `parse(format(x)) == x` (testable property §8.5).
    pub fn canonical(&self) -> String {
        match self {
            ChannelIdentifier::Numeric(n) => n.to_string(),
            ChannelIdentifier::Username(u) => format!("@{u}"),
            ChannelIdentifier::PublicLink(u) => format!("https://t.me/{u}"),
            ChannelIdentifier::MessageLink(u, n) => format!("https://t.me/{u}/{n}"),
            ChannelIdentifier::PrivateId(id) => format!("https://t.me/c/{id}"),
            ChannelIdentifier::PrivateMessage(id, n) => format!("https://t.me/c/{id}/{n}"),
            ChannelIdentifier::Invite(code) => format!("https://t.me/+{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_accepted_form() {
        assert_eq!(
            ChannelIdentifier::parse("-1001234567890"),
            Some(ChannelIdentifier::Numeric(-1001234567890))
        );
        assert_eq!(
            ChannelIdentifier::parse("@durov"),
            Some(ChannelIdentifier::Username("durov".into()))
        );
        assert_eq!(
            ChannelIdentifier::parse("durov"),
            Some(ChannelIdentifier::Username("durov".into()))
        );
        assert_eq!(
            ChannelIdentifier::parse("https://t.me/durov"),
            Some(ChannelIdentifier::PublicLink("durov".into()))
        );
        assert_eq!(
            ChannelIdentifier::parse("t.me/durov/42"),
            Some(ChannelIdentifier::MessageLink("durov".into(), 42))
        );
        assert_eq!(
            ChannelIdentifier::parse("https://t.me/c/1234567890"),
            Some(ChannelIdentifier::PrivateId(1234567890))
        );
        assert_eq!(
            ChannelIdentifier::parse("https://t.me/c/1234567890/7"),
            Some(ChannelIdentifier::PrivateMessage(1234567890, 7))
        );
        assert_eq!(
            ChannelIdentifier::parse("https://t.me/+AbCd123"),
            Some(ChannelIdentifier::Invite("AbCd123".into()))
        );
        assert_eq!(
            ChannelIdentifier::parse("+AbCd123"),
            Some(ChannelIdentifier::Invite("AbCd123".into()))
        );
        assert_eq!(ChannelIdentifier::parse(""), None);
    }

    #[test]
    fn round_trips_through_canonical_form() {
        let cases = vec![
            ChannelIdentifier::Numeric(-100123),
            ChannelIdentifier::Username("abcd".into()),
            ChannelIdentifier::PublicLink("abcd".into()),
            ChannelIdentifier::MessageLink("abcd".into(), 9),
            ChannelIdentifier::PrivateId(555),
            ChannelIdentifier::PrivateMessage(555, 9),
            ChannelIdentifier::Invite("xyz123".into()),
        ];
        for case in cases {
            let canon = case.canonical();
            assert_eq!(ChannelIdentifier::parse(&canon), Some(case), "for {canon}");
        }
    }
}
