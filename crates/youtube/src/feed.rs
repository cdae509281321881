//! Field extraction from PubSubHubbub Atom notifications.
//!
//! Only a handful of elements matter, so entries are located and picked
//! apart with patterns instead of a full XML parse. A broken entry yields an
//! error for that entry alone.

use regex::Regex;
use std::sync::LazyLock;
use unibox_core::error::NormalizeError;

static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<entry\b[^>]*>(.*?)</entry>").expect("valid entry regex"));

static DELETED_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<at:deleted-entry\b[^>]*\bref="([^"]*)""#).expect("valid deleted-entry regex")
});

static AUTHOR_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<author\b[^>]*>.*?<name>(.*?)</name>").expect("valid author regex")
});

static AUTHOR_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<author\b[^>]*>.*?<uri>(.*?)</uri>").expect("valid author uri regex")
});

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\b[^>]*\brel="alternate"[^>]*\bhref="([^"]*)""#).expect("valid link regex")
});

/// One `<entry>` of a feed notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedEntry {
    pub video_id: String,
    pub channel_id: String,
    pub title: Option<String>,
    pub author_name: Option<String>,
    pub author_uri: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
}

/// Whatever the notification carried.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Entry(FeedEntry),
    /// `<at:deleted-entry ref="yt:video:{id}">`.
    Deleted(String),
    Broken(NormalizeError),
}

/// Text of the first `<tag>...</tag>` in `xml`. `tag` may carry a namespace
/// prefix (`yt:videoId`).
fn element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open_start = xml.find(&format!("<{tag}"))?;
    let after_name = open_start + tag.len() + 1;
    // Reject a longer tag name sharing the prefix (`<title>` vs `<titles>`).
    match xml[after_name..].chars().next()? {
        '>' | ' ' | '\t' | '\n' | '\r' => {}
        _ => return element(&xml[after_name..], tag),
    }
    let open_end = after_name + xml[after_name..].find('>')? + 1;
    let close = xml[open_end..].find(&format!("</{tag}>"))?;
    Some(xml[open_end..open_end + close].trim())
}

/// Decode the five predefined XML entities and numeric character
/// references.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let decoded = match &tail[1..semi] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            num if num.starts_with("#x") => u32::from_str_radix(&num[2..], 16).ok().and_then(char::from_u32),
            num if num.starts_with('#') => num[1..].parse().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn cdata_or_text(raw: &str) -> String {
    match raw.strip_prefix("<![CDATA[").and_then(|r| r.strip_suffix("]]>")) {
        Some(inner) => inner.to_string(),
        None => unescape(raw),
    }
}

fn parse_entry(body: &str) -> Result<FeedEntry, NormalizeError> {
    let required = |tag: &str| {
        element(body, tag)
            .filter(|v| !v.is_empty())
            .map(cdata_or_text)
            .ok_or_else(|| NormalizeError::new(format!("entry has no <{tag}>"), body))
    };
    let optional = |tag: &str| element(body, tag).filter(|v| !v.is_empty()).map(cdata_or_text);

    Ok(FeedEntry {
        video_id: required("yt:videoId")?,
        channel_id: required("yt:channelId")?,
        title: optional("title"),
        author_name: AUTHOR_NAME.captures(body).and_then(|c| c.get(1)).map(|m| unescape(m.as_str().trim())),
        author_uri: AUTHOR_URI.captures(body).and_then(|c| c.get(1)).map(|m| unescape(m.as_str().trim())),
        link: LINK.captures(body).and_then(|c| c.get(1)).map(|m| unescape(m.as_str())),
        published: optional("published"),
        updated: optional("updated"),
    })
}

/// Split a notification into items. Fails only when the body is not an
/// Atom document at all.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, NormalizeError> {
    if !xml.contains("<feed") {
        return Err(NormalizeError::new("body is not an Atom feed", xml));
    }
    let mut items: Vec<FeedItem> = DELETED_ENTRY
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let reference = m.as_str();
            FeedItem::Deleted(reference.rsplit(':').next().unwrap_or(reference).to_string())
        })
        .collect();
    items.extend(ENTRY.captures_iter(xml).filter_map(|c| c.get(1)).map(|m| {
        match parse_entry(m.as_str()) {
            Ok(entry) => FeedItem::Entry(entry),
            Err(err) => FeedItem::Broken(err),
        }
    }));
    Ok(items)
}
