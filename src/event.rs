//! Nostr event model and canonical hashing.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. NIP-98 authorization events carry two:
///
/// - `u` – the absolute URL the event authorizes
/// - `method` – the HTTP method the event authorizes
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved. For
/// example, a `["method", "POST"]` tag from the protocol is represented as
/// `Tag(vec!["method".into(), "POST".into()])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

/// A signed Nostr event as received from a client.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "b2d6...",
///   "kind": 27235,
///   "created_at": 1700000000,
///   "tags": [["u", "https://example.test/login"], ["method", "POST"]],
///   "content": "",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (x-only, hex).
    pub pubkey: String,
    /// Kind number, `27235` for HTTP auth events.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `u` (URL) or `method`.
    pub tags: Vec<Tag>,
    /// Event content body, opaque to verification.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Look up the value of the first tag named `name` with at least two
    /// fields. First occurrence wins so duplicate tags cannot override an
    /// already-seen claim.
    pub fn first_tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|Tag(fields)| match fields.as_slice() {
                [t, val, ..] if t == name => Some(val.as_str()),
                _ => None,
            })
    }
}

/// Recompute the Nostr event hash from its fields.
///
/// The digest is SHA-256 over the canonical array serialization
/// `[0, pubkey, created_at, kind, tags, content]` in compact JSON with no
/// extraneous whitespace. Any mutation of any field changes the digest.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}
