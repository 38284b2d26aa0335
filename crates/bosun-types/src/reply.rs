//! Reply back-references and presentation styling.

use serde::Deserialize;

/// Opaque reference to the chat message a command came from.
///
/// The executor never looks inside; the writer pattern-matches the variant
/// to recover the channel and timestamp it needs for posting, reactions,
/// and threading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyRef {
    /// A plain channel message.
    Message { channel: String, ts: String },
    /// An at-mention of the bot.
    AppMention { channel: String, ts: String },
}

impl ReplyRef {
    pub fn channel(&self) -> &str {
        match self {
            ReplyRef::Message { channel, .. } | ReplyRef::AppMention { channel, .. } => channel,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            ReplyRef::Message { ts, .. } | ReplyRef::AppMention { ts, .. } => ts,
        }
    }
}

/// How a command's output is presented in chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReplyStyle {
    pub username: String,
    pub icon_emoji: String,
    pub icon_url: String,
    pub post_as_reply: bool,
    pub always_broadcast: bool,
    pub monospaced: bool,
}

/// Per-command styling overrides.
///
/// Every field is optional; unset fields fall back to the top-level
/// [`ReplyStyle`] at config load.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplyStyleOverrides {
    pub username: Option<String>,
    pub icon_emoji: Option<String>,
    pub icon_url: Option<String>,
    pub post_as_reply: Option<bool>,
    pub always_broadcast: Option<bool>,
    pub monospaced: Option<bool>,
}

impl ReplyStyleOverrides {
    /// Resolve the overrides against the top-level style.
    pub fn merge(&self, base: &ReplyStyle) -> ReplyStyle {
        ReplyStyle {
            username: self.username.clone().unwrap_or_else(|| base.username.clone()),
            icon_emoji: self
                .icon_emoji
                .clone()
                .unwrap_or_else(|| base.icon_emoji.clone()),
            icon_url: self.icon_url.clone().unwrap_or_else(|| base.icon_url.clone()),
            post_as_reply: self.post_as_reply.unwrap_or(base.post_as_reply),
            always_broadcast: self.always_broadcast.unwrap_or(base.always_broadcast),
            monospaced: self.monospaced.unwrap_or(base.monospaced),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_ref_accessors() {
        let m = ReplyRef::Message {
            channel: "C123".into(),
            ts: "111.222".into(),
        };
        assert_eq!(m.channel(), "C123");
        assert_eq!(m.timestamp(), "111.222");

        let a = ReplyRef::AppMention {
            channel: "C456".into(),
            ts: "333.444".into(),
        };
        assert_eq!(a.channel(), "C456");
        assert_eq!(a.timestamp(), "333.444");
    }

    #[test]
    fn overrides_fall_back_to_base() {
        let base = ReplyStyle {
            username: "bosun".into(),
            icon_emoji: ":ghost:".into(),
            post_as_reply: true,
            ..Default::default()
        };
        let overrides = ReplyStyleOverrides {
            username: Some("deployer".into()),
            monospaced: Some(true),
            ..Default::default()
        };
        let merged = overrides.merge(&base);
        assert_eq!(merged.username, "deployer");
        assert_eq!(merged.icon_emoji, ":ghost:");
        assert!(merged.post_as_reply);
        assert!(merged.monospaced);
        assert!(!merged.always_broadcast);
    }
}
