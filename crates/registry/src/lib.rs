//! Core of the NosPet decentralized pet-health registry.
//!
//! All durable state lives on third-party Nostr relays; images live on a
//! Blossom media server. This crate owns everything between the UI and
//! those collaborators:
//!
//! - `session`: relay pool ownership, the login state machine and the
//!   `publish`/`subscribe_to_events` surface
//! - `signer`: the three signing strategies (local key, external
//!   capability, delegated login service)
//! - `auth`: the narrow interface to the external login service
//! - `records`: the kind-42 record schema and its tag conventions
//! - `timeline`: the idempotent consumer-side merge every view uses
//! - `blossom`: authenticated image upload

pub mod auth;
pub mod blossom;
pub mod error;
pub mod records;
pub mod session;
pub mod signer;
pub mod timeline;

pub use auth::{AuthNotification, LoginWidget};
pub use blossom::{BlossomClient, UploadError, mime_type_for};
pub use error::SessionError;
pub use records::{
    APP_NAMESPACE, CHAT_SECTION, ChatMessage, GROUP_CHANNEL_ID, KIND_REGISTRY_RECORD, LogEntry,
    LogEntryKind, PetProfile, RecordError, all_pets_filter, chat_filter, create_log_entry_event,
    create_pet_profile_event, logbook_filter, my_pets_filter, pet_profile_filter,
};
pub use session::{DEFAULT_RELAY_URLS, LoginMethod, Session};
pub use signer::{
    DelegatedSigner, ExtensionCapability, ExtensionSigner, LocalKeySigner, Signer, SignerError,
};
pub use timeline::{Timeline, TimelineEntry};
