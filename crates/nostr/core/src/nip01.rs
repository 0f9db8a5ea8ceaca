//! NIP-01: basic event model, event-id hashing, signing and filters.
//!
//! Internal module boundaries:
//! - event model (`Event`, `EventTemplate`) and canonical id hashing
//! - schnorr signing/verification delegated to `secp256k1`
//! - subscription `Filter` with wire serialization and client-side matching

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur while hashing, signing or verifying events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("key or signature error: {0}")]
    Crypto(#[from] secp256k1::Error),

    #[error("event id does not match event contents")]
    IdMismatch,
}

/// A signed Nostr event as it travels over the wire.
///
/// `id` is the lowercase hex SHA-256 of the canonical serialization and
/// `sig` a BIP-340 schnorr signature over that digest. Both are checked by
/// [`validate_event`]; this crate never re-derives them on read paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// The unsigned template a signer turns into an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Current unix time in seconds, `None` if the clock is before the epoch.
pub fn unix_now_secs() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs())
}

/// Generate a fresh random secret key.
pub fn generate_secret_key() -> SecretKey {
    SecretKey::new(&mut secp256k1::rand::thread_rng())
}

/// Parse a secret key from its 64-char hex encoding.
pub fn secret_key_from_hex(hex_key: &str) -> Result<SecretKey, Nip01Error> {
    let bytes = hex::decode(hex_key)?;
    Ok(SecretKey::from_slice(&bytes)?)
}

/// X-only public key for a secret key.
pub fn get_public_key(secret_key: &SecretKey) -> XOnlyPublicKey {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    keypair.x_only_public_key().0
}

/// Hex-encoded x-only public key for a secret key.
pub fn get_public_key_hex(secret_key: &SecretKey) -> String {
    hex::encode(get_public_key(secret_key).serialize())
}

/// Canonical event digest per NIP-01: sha256 of
/// `[0, pubkey, created_at, kind, tags, content]`.
fn event_digest(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32], Nip01Error> {
    let canonical = serde_json::to_string(&json!([0, pubkey, created_at, kind, tags, content]))?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}

/// Hex event id for the given event fields.
pub fn get_event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String, Nip01Error> {
    Ok(hex::encode(event_digest(
        pubkey, created_at, kind, tags, content,
    )?))
}

/// Sign a template with a locally held secret key, producing a full event.
///
/// The pubkey is derived from the key; the template's `created_at`, `kind`,
/// `tags` and `content` are taken as-is.
pub fn finalize_event(template: &EventTemplate, secret_key: &SecretKey) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let pubkey = hex::encode(keypair.x_only_public_key().0.serialize());

    let digest = event_digest(
        &pubkey,
        template.created_at,
        template.kind,
        &template.tags,
        &template.content,
    )?;
    let signature = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest), &keypair);

    Ok(Event {
        id: hex::encode(digest),
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: hex::encode(signature.serialize()),
    })
}

/// Check the schnorr signature of an event against its claimed id fields.
pub fn verify_event(event: &Event) -> Result<(), Nip01Error> {
    let secp = Secp256k1::new();
    let pubkey = XOnlyPublicKey::from_slice(&hex::decode(&event.pubkey)?)?;
    let signature = Signature::from_slice(&hex::decode(&event.sig)?)?;
    let digest = event_digest(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    )?;
    secp.verify_schnorr(&signature, &Message::from_digest(digest), &pubkey)?;
    Ok(())
}

/// Full validation: recompute the id and verify the signature.
pub fn validate_event(event: &Event) -> Result<(), Nip01Error> {
    let expected = get_event_hash(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    )?;
    if expected != event.id {
        return Err(Nip01Error::IdMismatch);
    }
    verify_event(event)
}

/// A subscription filter as sent in `REQ` frames.
///
/// Tag constraints are keyed by bare tag name (`d`, `e`, `I`, `p`, ...) and
/// serialize with the `#` prefix the protocol expects. Tag names are
/// case-sensitive: `e` and `I` are distinct constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u16>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u64>,
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain to a single event id (appends to any existing ids).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.get_or_insert_with(Vec::new).push(id.into());
        self
    }

    /// Constrain to events signed by the given author.
    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    /// Constrain to a kind (appends to any existing kinds).
    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    /// Require a tag `[name, value, ...]` with `value` among the accepted
    /// values for `name`.
    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Wire representation: a JSON object with `#`-prefixed tag keys.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(ids) = &self.ids {
            map.insert("ids".to_string(), json!(ids));
        }
        if let Some(authors) = &self.authors {
            map.insert("authors".to_string(), json!(authors));
        }
        if let Some(kinds) = &self.kinds {
            map.insert("kinds".to_string(), json!(kinds));
        }
        if let Some(since) = self.since {
            map.insert("since".to_string(), json!(since));
        }
        if let Some(until) = self.until {
            map.insert("until".to_string(), json!(until));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".to_string(), json!(limit));
        }
        for (name, values) in &self.tags {
            map.insert(format!("#{name}"), json!(values));
        }
        Value::Object(map)
    }

    /// Client-side equivalent of relay-side matching. Every present field
    /// constrains; a tag constraint needs at least one event tag whose value
    /// is among the accepted values.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| *id == event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.iter().any(|author| *author == event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }
        for (name, values) in &self.tags {
            let present = event.tags.iter().any(|tag| {
                tag.first().is_some_and(|tag_name| tag_name == name)
                    && tag.get(1).is_some_and(|value| values.iter().any(|want| want == value))
            });
            if !present {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_event(content: &str) -> Event {
        let secret_key = generate_secret_key();
        let template = EventTemplate {
            kind: 42,
            created_at: 1_700_000_000,
            tags: vec![vec!["d".to_string(), "ns".to_string()]],
            content: content.to_string(),
        };
        finalize_event(&template, &secret_key).unwrap()
    }

    #[test]
    fn finalize_produces_valid_event() {
        let event = signed_event("hello");
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.pubkey.len(), 64);
        assert_eq!(event.sig.len(), 128);
        validate_event(&event).unwrap();
    }

    #[test]
    fn event_id_is_deterministic_over_fields() {
        let secret_key = generate_secret_key();
        let template = EventTemplate {
            kind: 1,
            created_at: 123,
            tags: vec![],
            content: "same".to_string(),
        };
        let first = finalize_event(&template, &secret_key).unwrap();
        let second = finalize_event(&template, &secret_key).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn tampered_content_fails_validation() {
        let mut event = signed_event("original");
        event.content = "tampered".to_string();
        assert!(validate_event(&event).is_err());
    }

    #[test]
    fn tampered_id_is_detected() {
        let mut event = signed_event("original");
        event.id = "0".repeat(64);
        assert!(matches!(
            validate_event(&event),
            Err(Nip01Error::IdMismatch)
        ));
    }

    #[test]
    fn signature_from_wrong_key_is_rejected() {
        let event = signed_event("original");
        let other = signed_event("original");
        let forged = Event {
            sig: other.sig,
            ..event
        };
        assert!(verify_event(&forged).is_err());
    }

    #[test]
    fn secret_key_hex_round_trip() {
        let secret_key = generate_secret_key();
        let hex_key = hex::encode(secret_key.secret_bytes());
        let parsed = secret_key_from_hex(&hex_key).unwrap();
        assert_eq!(parsed.secret_bytes(), secret_key.secret_bytes());
    }

    #[test]
    fn filter_serializes_tag_keys_with_hash_prefix() {
        let filter = Filter::new()
            .kind(42)
            .tag("d", "nospetregistry-v0")
            .tag("e", "channel");
        let value = filter.to_value();
        assert_eq!(value["kinds"], json!([42]));
        assert_eq!(value["#d"], json!(["nospetregistry-v0"]));
        assert_eq!(value["#e"], json!(["channel"]));
        assert!(value.get("ids").is_none());
    }

    #[test]
    fn filter_matching_honors_every_constraint() {
        let event = signed_event("hello");

        assert!(Filter::new().kind(42).matches(&event));
        assert!(Filter::new().id(event.id.clone()).matches(&event));
        assert!(Filter::new().author(event.pubkey.clone()).matches(&event));
        assert!(Filter::new().tag("d", "ns").matches(&event));
        assert!(Filter::new().since(1_600_000_000).matches(&event));
        assert!(Filter::new().until(1_800_000_000).matches(&event));

        assert!(!Filter::new().kind(1).matches(&event));
        assert!(!Filter::new().id("other").matches(&event));
        assert!(!Filter::new().tag("d", "other-ns").matches(&event));
        assert!(!Filter::new().since(1_800_000_000).matches(&event));
        assert!(!Filter::new().until(1_600_000_000).matches(&event));
    }

    #[test]
    fn filter_tag_names_are_case_sensitive() {
        let event = signed_event("hello");
        // The event carries a lowercase `d` tag only.
        assert!(Filter::new().tag("d", "ns").matches(&event));
        assert!(!Filter::new().tag("D", "ns").matches(&event));
        assert!(!Filter::new().tag("I", "ns").matches(&event));
    }
}
