//! Message-text normalization.
//!
//! Slack hands us marked-up text: mention tokens, HTML-escaped entities,
//! auto-linked URLs in angle brackets, and client-side "smart" quotes. All
//! of it has to go before the parser sees the line, or a pasted URL would
//! never match a keyword and a curly quote would start an unterminated
//! string.

use std::sync::OnceLock;

use regex::{Captures, Regex};

static MENTION: OnceLock<Regex> = OnceLock::new();
static LINK: OnceLock<Regex> = OnceLock::new();

fn mention_re() -> &'static Regex {
    MENTION.get_or_init(|| Regex::new(r"<@[^>]+>").unwrap())
}

/// `<url>` or `<url|display>`; deliberately excludes `<@…>` mentions,
/// `<!…>` specials, and `<#…>` channel references.
fn link_re() -> &'static Regex {
    LINK.get_or_init(|| Regex::new(r"<([^<>|@!#][^<>|]*)(?:\|([^<>]*))?>").unwrap())
}

/// Normalize one message body.
pub fn normalize(text: &str) -> String {
    let text = mention_re().replace_all(text, "");
    let text = link_re().replace_all(&text, |caps: &Captures| {
        match caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(display) => display.to_string(),
            None => caps[1].to_string(),
        }
    });
    let text = unescape_entities(&text);
    normalize_quotes(&text)
}

/// Undo Slack's HTML entity escaping in a single left-to-right pass.
fn unescape_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        if let Some(tail) = rest.strip_prefix("&amp;") {
            out.push('&');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("&lt;") {
            out.push('<');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("&gt;") {
            out.push('>');
            rest = tail;
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Replace U+2018/U+2019/U+201C/U+201D with their ASCII equivalents.
fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            c => c,
        })
        .collect()
}
