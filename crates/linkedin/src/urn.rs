//! LinkedIn URN parsing.

use regex::Regex;
use std::sync::LazyLock;

static PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^urn:li:person:([A-Za-z0-9_-]+)$").expect("valid person URN regex"));

static ORGANIZATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^urn:li:organization:(\d+)$").expect("valid organization URN regex"));

static POST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^urn:li:(activity|share|ugcPost):(\d+)$").expect("valid post URN regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^urn:li:comment:\((.+)\)$").expect("valid comment URN regex"));

/// `urn:li:person:{id}` -> `id`.
pub fn person_id(urn: &str) -> Option<&str> {
    PERSON.captures(urn)?.get(1).map(|m| m.as_str())
}

/// `urn:li:organization:{id}` -> `id`.
pub fn organization_id(urn: &str) -> Option<&str> {
    ORGANIZATION.captures(urn)?.get(1).map(|m| m.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostUrn<'a> {
    /// `activity`, `share` or `ugcPost`.
    pub kind: &'a str,
    pub id: &'a str,
}

/// `urn:li:(activity|share|ugcPost):{id}`.
pub fn post_urn(urn: &str) -> Option<PostUrn<'_>> {
    let caps = POST.captures(urn)?;
    Some(PostUrn {
        kind: caps.get(1)?.as_str(),
        id: caps.get(2)?.as_str(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentUrn<'a> {
    pub post_kind: &'a str,
    pub post_id: &'a str,
    pub comment_id: &'a str,
}

/// `urn:li:comment:(activity:{postId},{commentId})`. The post part may also
/// be a full nested URN (`urn:li:activity:{postId}`); the comment id is
/// whatever follows the final comma.
pub fn comment_urn(urn: &str) -> Option<CommentUrn<'_>> {
    let inner = COMMENT.captures(urn)?.get(1)?.as_str();
    let (post, comment_id) = inner.rsplit_once(',')?;
    let post = post.trim().trim_start_matches("urn:li:");
    let (post_kind, post_id) = post.rsplit_once(':')?;
    let comment_id = comment_id.trim();
    if post_id.is_empty() || comment_id.is_empty() {
        return None;
    }
    Some(CommentUrn {
        post_kind,
        post_id,
        comment_id,
    })
}

impl CommentUrn<'_> {
    pub fn post_urn(&self) -> String {
        format!("urn:li:{}:{}", self.post_kind, self.post_id)
    }
}

/// Percent-encode a URN for use as a Rest.li path key.
pub fn encode_urn(urn: &str) -> String {
    let mut out = String::with_capacity(urn.len() * 3);
    for byte in urn.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
