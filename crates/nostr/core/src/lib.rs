//! Reusable Nostr protocol primitives for the NosPet registry.
//!
//! Internal module boundaries:
//! - `nip01`: event model, id hashing, schnorr signing, subscription filters
//! - `nip19`: bech32 key encodings (npub/nsec)
//! - `blossom`: media-server upload authorization events
//! - `tag_parsing`: tag access helpers

pub mod blossom;
pub mod nip01;
pub mod nip19;
pub mod tag_parsing;

pub use nip01::{
    Event, EventTemplate, Filter, Nip01Error, finalize_event, generate_secret_key, get_event_hash,
    get_public_key, get_public_key_hex, secret_key_from_hex, unix_now_secs, validate_event,
    verify_event,
};
pub use nip19::{Nip19Error, npub_decode, npub_encode, nsec_decode, nsec_encode};
pub use secp256k1::SecretKey;
pub use tag_parsing::{collect_tag_values, find_tag, find_tag_value, is_tag, tag_name};
