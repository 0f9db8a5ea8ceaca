//! Registry record schema.
//!
//! Every record the registry writes is a **kind 42** event; record types
//! are discriminated purely by tag conventions layered on top:
//!
//! - `d`: application namespace (`nospetregistry-v0` for pet profiles,
//!   `..._vac` / `..._dew` for logbook entries)
//! - `e`: anchor to the one shared channel every record belongs to
//! - `I`: owning pet's event id, on logbook entries
//! - `p`: owner public key, on logbook entries
//! - `s`: chat section marker, on group-chat messages
//!
//! Tag discrimination is the authoritative contract, so parsers here check
//! the discriminating tags and reject events whose tags belong to a
//! different record type, instead of trusting the shared kind value.

use chrono::NaiveDate;
use nostr::{Event, EventTemplate, Filter, find_tag_value, unix_now_secs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The one event kind shared by every registry record.
pub const KIND_REGISTRY_RECORD: u16 = 42;

/// Namespace tag value identifying this application's profile events.
pub const APP_NAMESPACE: &str = "nospetregistry-v0";

/// Event id of the shared channel all records anchor to.
pub const GROUP_CHANNEL_ID: &str =
    "0cc9446260056b38d29bffff924e9b4a18af81f7d73749d8efd1b4b2d81271da";

/// Section marker carried by chat messages in the `s` tag.
pub const CHAT_SECTION: &str = "group-chat";

/// Errors raised while reading record content from events.
///
/// One malformed event is skipped by the consumer; it never aborts the
/// surrounding subscription.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record content: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected event kind {0}")]
    WrongKind(u16),

    #[error("expected a {expected} record, found tags for something else")]
    WrongRecordType { expected: &'static str },

    #[error("empty chat message")]
    EmptyMessage,
}

fn channel_anchor_tag(channel_id: &str) -> Vec<String> {
    vec![
        "e".to_string(),
        channel_id.to_string(),
        String::new(),
        "root".to_string(),
    ]
}

// ---------------------------------------------------------------------
// Pet profiles
// ---------------------------------------------------------------------

/// A registered pet.
///
/// `owner_pubkey` always mirrors the signing key of the carrying event;
/// parsers overwrite whatever the content claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetProfile {
    pub name: String,
    pub race: String,
    pub birthday: String,
    #[serde(default)]
    pub image: String,
    #[serde(rename = "ownerPubKey")]
    pub owner_pubkey: String,
    pub timestamp: u64,
}

impl PetProfile {
    pub fn to_tags(&self) -> Vec<Vec<String>> {
        let mut tags = vec![
            vec!["d".to_string(), APP_NAMESPACE.to_string()],
            vec!["name".to_string(), self.name.clone()],
            vec!["race".to_string(), self.race.clone()],
            vec!["birthday".to_string(), self.birthday.clone()],
        ];
        if !self.image.is_empty() {
            tags.push(vec!["image".to_string(), self.image.clone()]);
        }
        tags.push(vec!["owner".to_string(), self.owner_pubkey.clone()]);
        tags.push(channel_anchor_tag(GROUP_CHANNEL_ID));
        tags
    }

    /// Read a profile back out of its event.
    pub fn from_event(event: &Event) -> Result<Self, RecordError> {
        if event.kind != KIND_REGISTRY_RECORD {
            return Err(RecordError::WrongKind(event.kind));
        }
        if find_tag_value(&event.tags, "d") != Some(APP_NAMESPACE) {
            return Err(RecordError::WrongRecordType {
                expected: "pet profile",
            });
        }
        let mut profile: PetProfile = serde_json::from_str(&event.content)?;
        profile.owner_pubkey = event.pubkey.clone();
        Ok(profile)
    }
}

/// Unsigned template for registering a pet.
pub fn create_pet_profile_event(profile: &PetProfile) -> Result<EventTemplate, RecordError> {
    Ok(EventTemplate {
        kind: KIND_REGISTRY_RECORD,
        created_at: unix_now_secs().unwrap_or(0),
        tags: profile.to_tags(),
        content: serde_json::to_string(profile)?,
    })
}

// ---------------------------------------------------------------------
// Logbook entries
// ---------------------------------------------------------------------

/// The two logbook record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryKind {
    Vaccine,
    Deworming,
}

impl LogEntryKind {
    /// Namespace carried in the `d` tag.
    pub fn namespace(&self) -> String {
        match self {
            LogEntryKind::Vaccine => format!("{APP_NAMESPACE}_vac"),
            LogEntryKind::Deworming => format!("{APP_NAMESPACE}_dew"),
        }
    }

    /// Category carried in the `c` tag.
    pub fn category(&self) -> &'static str {
        match self {
            LogEntryKind::Vaccine => "vaccine",
            LogEntryKind::Deworming => "deworming",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LogEntryKind::Vaccine => "vaccine entry",
            LogEntryKind::Deworming => "deworming entry",
        }
    }
}

/// One vaccine or deworming record for a pet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Treatment date as entered by the owner (`YYYY-MM-DD`).
    pub date: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "petId")]
    pub pet_id: String,
    #[serde(rename = "ownerPubKey")]
    pub owner_pubkey: String,
    pub timestamp: u64,
}

impl LogEntry {
    pub fn to_tags(&self, kind: LogEntryKind) -> Vec<Vec<String>> {
        vec![
            vec!["d".to_string(), kind.namespace()],
            vec!["c".to_string(), kind.category().to_string()],
            vec!["I".to_string(), self.pet_id.clone()],
            vec!["p".to_string(), self.owner_pubkey.clone()],
            channel_anchor_tag(GROUP_CHANNEL_ID),
        ]
    }

    /// Read a logbook entry of the given type back out of its event.
    pub fn from_event(event: &Event, kind: LogEntryKind) -> Result<Self, RecordError> {
        if event.kind != KIND_REGISTRY_RECORD {
            return Err(RecordError::WrongKind(event.kind));
        }
        let namespace = kind.namespace();
        if find_tag_value(&event.tags, "d") != Some(namespace.as_str())
            || find_tag_value(&event.tags, "c") != Some(kind.category())
        {
            return Err(RecordError::WrongRecordType {
                expected: kind.label(),
            });
        }
        let mut entry: LogEntry = serde_json::from_str(&event.content)?;
        entry.owner_pubkey = event.pubkey.clone();
        Ok(entry)
    }

    /// Domain ordering key: the content-supplied date, not `created_at`.
    /// Entries with unparseable dates sort first.
    pub fn order_key(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }
}

/// Unsigned template for adding a logbook entry.
pub fn create_log_entry_event(
    entry: &LogEntry,
    kind: LogEntryKind,
) -> Result<EventTemplate, RecordError> {
    Ok(EventTemplate {
        kind: KIND_REGISTRY_RECORD,
        created_at: unix_now_secs().unwrap_or(0),
        tags: entry.to_tags(kind),
        content: serde_json::to_string(entry)?,
    })
}

// ---------------------------------------------------------------------
// Group chat
// ---------------------------------------------------------------------

/// One chat message, extracted from its event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub created_at: u64,
}

impl ChatMessage {
    /// Read a chat message out of its event. Blank messages are rejected so
    /// consumers can skip them uniformly.
    pub fn from_event(event: &Event) -> Result<Self, RecordError> {
        if event.kind != KIND_REGISTRY_RECORD {
            return Err(RecordError::WrongKind(event.kind));
        }
        if find_tag_value(&event.tags, "s") != Some(CHAT_SECTION) {
            return Err(RecordError::WrongRecordType {
                expected: "chat message",
            });
        }
        if event.content.trim().is_empty() {
            return Err(RecordError::EmptyMessage);
        }
        Ok(Self {
            id: event.id.clone(),
            sender: event.pubkey.clone(),
            content: event.content.clone(),
            created_at: event.created_at,
        })
    }
}

/// Tags for a message in the given channel.
pub fn chat_message_tags(channel_id: &str) -> Vec<Vec<String>> {
    vec![
        channel_anchor_tag(channel_id),
        vec!["s".to_string(), CHAT_SECTION.to_string()],
    ]
}

// ---------------------------------------------------------------------
// Subscription filters
// ---------------------------------------------------------------------

/// Every registered pet, regardless of owner.
pub fn all_pets_filter() -> Filter {
    Filter::new()
        .kind(KIND_REGISTRY_RECORD)
        .tag("d", APP_NAMESPACE)
        .tag("e", GROUP_CHANNEL_ID)
}

/// Pets registered by one owner.
pub fn my_pets_filter(owner_pubkey: &str) -> Filter {
    all_pets_filter().author(owner_pubkey)
}

/// A single pet profile by its event id.
pub fn pet_profile_filter(pet_id: &str) -> Filter {
    all_pets_filter().id(pet_id)
}

/// Logbook entries of one type for one pet.
pub fn logbook_filter(kind: LogEntryKind, pet_id: &str) -> Filter {
    Filter::new()
        .kind(KIND_REGISTRY_RECORD)
        .tag("d", kind.namespace())
        .tag("I", pet_id)
        .tag("e", GROUP_CHANNEL_ID)
}

/// Messages in a chat channel.
pub fn chat_filter(channel_id: &str) -> Filter {
    Filter::new()
        .kind(KIND_REGISTRY_RECORD)
        .tag("e", channel_id)
        .tag("s", CHAT_SECTION)
}
