//! NIP-98 authorization event verification.
//!
//! A login request carries a signed kind-27235 event that acts as a
//! short-lived bearer credential for a single URL and HTTP method. The
//! verifier runs a fixed pipeline over the raw JSON: parse, structural
//! validation, kind check, freshness window, tag claims, canonical id
//! recomputation, and Schnorr signature verification. The first failing
//! stage short-circuits with a typed error; an event is either accepted
//! as a whole or rejected as a whole.
//!
//! Verification is a pure function of the payload and the caller-supplied
//! [`VerificationContext`]; it performs no I/O and keeps no state, so it is
//! safe to call from any number of concurrent requests.

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::event::{event_hash, Event, Tag};
use crate::identity::ProfileMetadata;

/// Event kind reserved for NIP-98 HTTP authorization.
pub const HTTP_AUTH_KIND: u32 = 27235;

/// Maximum accepted age of an authorization event, in seconds.
pub const FRESHNESS_WINDOW_SECS: i64 = 60;

/// Caller-supplied expectations the event must authorize.
///
/// `now` is injected rather than read from the clock so verification stays
/// a pure function and freshness boundaries are testable.
#[derive(Debug, Clone)]
pub struct VerificationContext {
    /// Absolute URL the event must claim in its `u` tag.
    pub expected_url: String,
    /// HTTP method the event must claim in its `method` tag.
    pub expected_method: String,
    /// Current server time as a Unix timestamp.
    pub now: u64,
}

/// Successful verification result.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaim {
    /// The event author's x-only public key, hex, exactly as supplied.
    pub pubkey: String,
    /// Profile metadata parsed from the event content, when the content is
    /// a JSON object carrying kind-0 style fields.
    pub metadata_hint: Option<ProfileMetadata>,
}

/// Reasons a candidate event is rejected. Each maps to "reject this login
/// attempt"; none is fatal to the process.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerificationError {
    #[error("payload is not a JSON object")]
    MalformedJson,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid type or shape for field `{0}`")]
    InvalidFieldType(&'static str),
    #[error("wrong event kind {0}, expected 27235")]
    WrongKind(u32),
    #[error("event outside freshness window (age {0}s)")]
    StaleEvent(i64),
    #[error("url mismatch: expected `{expected}`, got `{actual}`")]
    UrlMismatch { expected: String, actual: String },
    #[error("method mismatch: expected `{expected}`, got `{actual}`")]
    MethodMismatch { expected: String, actual: String },
    #[error("event id does not match canonical hash")]
    IdMismatch,
    #[error("invalid schnorr signature")]
    BadSignature,
}

impl VerificationError {
    /// True for failures of the cryptographic binding itself. These are
    /// logged distinctly because a well-formed claim with a broken id or
    /// signature suggests a forgery attempt rather than a client bug.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VerificationError::IdMismatch | VerificationError::BadSignature
        )
    }
}

/// Current time as a Unix timestamp, for building a [`VerificationContext`].
pub fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verify a raw NIP-98 event against the caller's expectations.
///
/// Stages run in a fixed order and the first failure wins: parse,
/// structural validation, kind, freshness, `u`/`method` tag claims,
/// canonical id recomputation, signature. On success the author's pubkey
/// is returned unchanged along with any metadata hint found in the
/// content.
pub fn verify(raw: &str, ctx: &VerificationContext) -> Result<VerifiedClaim, VerificationError> {
    let ev = parse_event(raw)?;

    if ev.kind != HTTP_AUTH_KIND {
        return Err(VerificationError::WrongKind(ev.kind));
    }

    // Freshness is two-sided: stale events are replayable and future-dated
    // events would outlive the window under clock skew. `created_at` is an
    // arbitrary u64, so the age is computed without a signed cast that
    // could wrap.
    if ev.created_at > ctx.now {
        let ahead = (ev.created_at - ctx.now).min(i64::MAX as u64) as i64;
        return Err(VerificationError::StaleEvent(-ahead));
    }
    let age = (ctx.now - ev.created_at).min(i64::MAX as u64) as i64;
    if age > FRESHNESS_WINDOW_SECS {
        return Err(VerificationError::StaleEvent(age));
    }

    let url = ev
        .first_tag("u")
        .ok_or(VerificationError::MissingField("u"))?;
    if url != ctx.expected_url {
        return Err(VerificationError::UrlMismatch {
            expected: ctx.expected_url.clone(),
            actual: url.to_string(),
        });
    }

    let method = ev
        .first_tag("method")
        .ok_or(VerificationError::MissingField("method"))?;
    if method != ctx.expected_method {
        return Err(VerificationError::MethodMismatch {
            expected: ctx.expected_method.clone(),
            actual: method.to_string(),
        });
    }

    // Recomputing the id makes the event tamper-evident: any mutation of
    // pubkey, created_at, kind, tags, or content changes the digest.
    let hash = event_hash(&ev).map_err(|_| VerificationError::MalformedJson)?;
    if hex::encode(hash) != ev.id {
        return Err(VerificationError::IdMismatch);
    }

    verify_signature(&ev, &hash)?;

    Ok(VerifiedClaim {
        metadata_hint: metadata_hint(&ev.content),
        pubkey: ev.pubkey,
    })
}

/// Verify the event's BIP-340 Schnorr signature over the 32-byte id.
fn verify_signature(ev: &Event, hash: &[u8; 32]) -> Result<(), VerificationError> {
    use VerificationError::BadSignature;
    let sig_bytes = hex::decode(&ev.sig).map_err(|_| BadSignature)?;
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| BadSignature)?;
    let pk_bytes = hex::decode(&ev.pubkey).map_err(|_| BadSignature)?;
    let pk = XOnlyPublicKey::from_slice(&pk_bytes).map_err(|_| BadSignature)?;
    let msg = Message::from_digest_slice(hash).map_err(|_| BadSignature)?;
    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&sig, &msg, &pk)
        .map_err(|_| BadSignature)
}

/// Parse and structurally validate a raw event payload.
///
/// `content` is the one field the protocol does not require: when absent it
/// defaults to the empty string, but a present non-string value is still a
/// type error.
fn parse_event(raw: &str) -> Result<Event, VerificationError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| VerificationError::MalformedJson)?;
    let obj = value.as_object().ok_or(VerificationError::MalformedJson)?;

    let id = hex_field(obj, "id", 64)?;
    let pubkey = hex_field(obj, "pubkey", 64)?;
    let created_at = int_field(obj, "created_at")?;
    let kind = int_field(obj, "kind")?;
    let kind = u32::try_from(kind).map_err(|_| VerificationError::InvalidFieldType("kind"))?;
    let tags = tags_field(obj)?;
    let content = match obj.get("content") {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(VerificationError::InvalidFieldType("content")),
    };
    let sig = hex_field(obj, "sig", 128)?;

    Ok(Event {
        id,
        pubkey,
        kind,
        created_at,
        tags,
        content,
        sig,
    })
}

/// Extract a required hex string field of exactly `len` characters.
fn hex_field(
    obj: &Map<String, Value>,
    name: &'static str,
    len: usize,
) -> Result<String, VerificationError> {
    let value = obj.get(name).ok_or(VerificationError::MissingField(name))?;
    let s = value
        .as_str()
        .ok_or(VerificationError::InvalidFieldType(name))?;
    if s.len() != len || hex::decode(s).is_err() {
        return Err(VerificationError::InvalidFieldType(name));
    }
    Ok(s.to_string())
}

/// Extract a required non-negative integer field.
fn int_field(obj: &Map<String, Value>, name: &'static str) -> Result<u64, VerificationError> {
    obj.get(name)
        .ok_or(VerificationError::MissingField(name))?
        .as_u64()
        .ok_or(VerificationError::InvalidFieldType(name))
}

/// Extract the `tags` field as an array of string arrays.
fn tags_field(obj: &Map<String, Value>) -> Result<Vec<Tag>, VerificationError> {
    let bad = VerificationError::InvalidFieldType("tags");
    let arr = obj
        .get("tags")
        .ok_or(VerificationError::MissingField("tags"))?
        .as_array()
        .ok_or(bad.clone())?;
    let mut tags = Vec::with_capacity(arr.len());
    for entry in arr {
        let fields = entry.as_array().ok_or(bad.clone())?;
        if fields.is_empty() {
            return Err(bad);
        }
        let mut tag = Vec::with_capacity(fields.len());
        for field in fields {
            tag.push(field.as_str().ok_or(bad.clone())?.to_string());
        }
        tags.push(Tag(tag));
    }
    Ok(tags)
}

/// Parse the event content as a profile metadata hint, if it carries one.
fn metadata_hint(content: &str) -> Option<ProfileMetadata> {
    serde_json::from_str::<ProfileMetadata>(content)
        .ok()
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::Keypair;

    const URL: &str = "https://example.test/login";
    const NOW: u64 = 1_700_000_000;

    fn ctx() -> VerificationContext {
        VerificationContext {
            expected_url: URL.into(),
            expected_method: "POST".into(),
            now: NOW,
        }
    }

    fn auth_tags() -> Vec<Tag> {
        vec![
            Tag(vec!["u".into(), URL.into()]),
            Tag(vec!["method".into(), "POST".into()]),
        ]
    }

    fn signed_event(kind: u32, created_at: u64, tags: Vec<Tag>, content: &str) -> Event {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &[1u8; 32]).unwrap();
        let pubkey = kp.x_only_public_key().0;
        let mut ev = Event {
            id: String::new(),
            pubkey: hex::encode(pubkey.serialize()),
            kind,
            created_at,
            tags,
            content: content.into(),
            sig: String::new(),
        };
        let hash = event_hash(&ev).unwrap();
        ev.id = hex::encode(hash);
        let msg = Message::from_digest_slice(&hash).unwrap();
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
        ev.sig = hex::encode(sig.as_ref());
        ev
    }

    fn raw(ev: &Event) -> String {
        serde_json::to_string(ev).unwrap()
    }

    #[test]
    fn accepts_valid_auth_event() {
        let ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "");
        let claim = verify(&raw(&ev), &ctx()).unwrap();
        assert_eq!(claim.pubkey, ev.pubkey);
        assert!(claim.metadata_hint.is_none());
    }

    #[test]
    fn parses_metadata_hint_from_content() {
        let content = r#"{"name":"Alice","about":"hi"}"#;
        let ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), content);
        let claim = verify(&raw(&ev), &ctx()).unwrap();
        let hint = claim.metadata_hint.unwrap();
        assert_eq!(hint.name.as_deref(), Some("Alice"));
        assert_eq!(hint.about.as_deref(), Some("hi"));
    }

    #[test]
    fn rejects_invalid_json() {
        assert_eq!(
            verify("not json", &ctx()),
            Err(VerificationError::MalformedJson)
        );
        assert_eq!(verify("[]", &ctx()), Err(VerificationError::MalformedJson));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut val = serde_json::to_value(signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), ""))
            .unwrap();
        val.as_object_mut().unwrap().remove("sig");
        assert_eq!(
            verify(&val.to_string(), &ctx()),
            Err(VerificationError::MissingField("sig"))
        );
    }

    #[test]
    fn rejects_bad_field_shapes() {
        let ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "");
        let mut val = serde_json::to_value(&ev).unwrap();
        val["pubkey"] = "abcd".into();
        assert_eq!(
            verify(&val.to_string(), &ctx()),
            Err(VerificationError::InvalidFieldType("pubkey"))
        );

        let mut val = serde_json::to_value(&ev).unwrap();
        val["created_at"] = "soon".into();
        assert_eq!(
            verify(&val.to_string(), &ctx()),
            Err(VerificationError::InvalidFieldType("created_at"))
        );

        let mut val = serde_json::to_value(&ev).unwrap();
        val["tags"] = serde_json::json!([["u", 7]]);
        assert_eq!(
            verify(&val.to_string(), &ctx()),
            Err(VerificationError::InvalidFieldType("tags"))
        );

        let mut val = serde_json::to_value(&ev).unwrap();
        val["content"] = serde_json::json!(42);
        assert_eq!(
            verify(&val.to_string(), &ctx()),
            Err(VerificationError::InvalidFieldType("content"))
        );
    }

    #[test]
    fn missing_content_defaults_to_empty() {
        let ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "");
        let mut val = serde_json::to_value(&ev).unwrap();
        val.as_object_mut().unwrap().remove("content");
        // The id was computed over empty content, so verification still
        // succeeds.
        assert!(verify(&val.to_string(), &ctx()).is_ok());
    }

    #[test]
    fn rejects_ordinary_note_kind() {
        let ev = signed_event(1, NOW, auth_tags(), "");
        assert_eq!(
            verify(&raw(&ev), &ctx()),
            Err(VerificationError::WrongKind(1))
        );
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let at_now = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "");
        assert!(verify(&raw(&at_now), &ctx()).is_ok());

        let at_limit = signed_event(HTTP_AUTH_KIND, NOW - 60, auth_tags(), "");
        assert!(verify(&raw(&at_limit), &ctx()).is_ok());

        let stale = signed_event(HTTP_AUTH_KIND, NOW - 61, auth_tags(), "");
        assert_eq!(
            verify(&raw(&stale), &ctx()),
            Err(VerificationError::StaleEvent(61))
        );
    }

    #[test]
    fn rejects_future_dated_events() {
        let future = signed_event(HTTP_AUTH_KIND, NOW + 5, auth_tags(), "");
        assert_eq!(
            verify(&raw(&future), &ctx()),
            Err(VerificationError::StaleEvent(-5))
        );
    }

    #[test]
    fn huge_created_at_rejected_without_overflow() {
        // A created_at past i64::MAX must come back as a rejection, not an
        // arithmetic panic.
        let ev = signed_event(HTTP_AUTH_KIND, 1u64 << 63, auth_tags(), "");
        assert!(matches!(
            verify(&raw(&ev), &ctx()),
            Err(VerificationError::StaleEvent(age)) if age < 0
        ));

        let ev = signed_event(HTTP_AUTH_KIND, u64::MAX, auth_tags(), "");
        assert_eq!(
            verify(&raw(&ev), &ctx()),
            Err(VerificationError::StaleEvent(-i64::MAX))
        );
    }

    #[test]
    fn rejects_missing_auth_tags() {
        let no_method = signed_event(
            HTTP_AUTH_KIND,
            NOW,
            vec![Tag(vec!["u".into(), URL.into()])],
            "",
        );
        assert_eq!(
            verify(&raw(&no_method), &ctx()),
            Err(VerificationError::MissingField("method"))
        );

        let no_url = signed_event(
            HTTP_AUTH_KIND,
            NOW,
            vec![Tag(vec!["method".into(), "POST".into()])],
            "",
        );
        assert_eq!(
            verify(&raw(&no_url), &ctx()),
            Err(VerificationError::MissingField("u"))
        );
    }

    #[test]
    fn rejects_url_and_method_mismatch() {
        let wrong_url = signed_event(
            HTTP_AUTH_KIND,
            NOW,
            vec![
                Tag(vec!["u".into(), "https://evil.test/login".into()]),
                Tag(vec!["method".into(), "POST".into()]),
            ],
            "",
        );
        assert!(matches!(
            verify(&raw(&wrong_url), &ctx()),
            Err(VerificationError::UrlMismatch { .. })
        ));

        let wrong_method = signed_event(
            HTTP_AUTH_KIND,
            NOW,
            vec![
                Tag(vec!["u".into(), URL.into()]),
                Tag(vec!["method".into(), "GET".into()]),
            ],
            "",
        );
        assert!(matches!(
            verify(&raw(&wrong_method), &ctx()),
            Err(VerificationError::MethodMismatch { .. })
        ));
    }

    #[test]
    fn first_tag_occurrence_wins() {
        // A duplicate `u` tag appended after the genuine one must not
        // override the already-seen claim.
        let mut tags = auth_tags();
        tags.push(Tag(vec!["u".into(), "https://evil.test/login".into()]));
        let ev = signed_event(HTTP_AUTH_KIND, NOW, tags, "");
        assert!(verify(&raw(&ev), &ctx()).is_ok());
    }

    #[test]
    fn tampered_content_fails_id_check() {
        let mut ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "hello");
        ev.content = "hellp".into();
        assert_eq!(verify(&raw(&ev), &ctx()), Err(VerificationError::IdMismatch));
    }

    #[test]
    fn tampered_id_with_matching_hash_fails_signature() {
        // Recompute the id after mutating created_at so the id check passes
        // and the failure falls through to the signature stage.
        let mut ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "");
        ev.created_at = NOW - 1;
        let hash = event_hash(&ev).unwrap();
        ev.id = hex::encode(hash);
        assert_eq!(
            verify(&raw(&ev), &ctx()),
            Err(VerificationError::BadSignature)
        );
    }

    #[test]
    fn corrupted_signature_rejected() {
        let mut ev = signed_event(HTTP_AUTH_KIND, NOW, auth_tags(), "");
        ev.sig.replace_range(0..2, "00");
        let res = verify(&raw(&ev), &ctx());
        assert_eq!(res, Err(VerificationError::BadSignature));
        assert!(res.unwrap_err().is_integrity_failure());
    }
}
