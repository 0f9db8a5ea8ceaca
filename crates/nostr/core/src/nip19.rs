//! NIP-19: bech32 encodings for keys.
//!
//! Only the two encodings the registry surfaces are provided: `npub` for
//! public identity display and `nsec` for secret-key handoff.

use bech32::{Bech32, Hrp};
use thiserror::Error;

const NPUB_HRP: &str = "npub";
const NSEC_HRP: &str = "nsec";
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("bech32 encoding failed: {0}")]
    Encode(String),

    #[error("bech32 decoding failed: {0}")]
    Decode(String),

    #[error("expected a {expected} entity, got {actual}")]
    WrongPrefix { expected: &'static str, actual: String },

    #[error("expected {KEY_LEN} key bytes, got {0}")]
    InvalidLength(usize),
}

fn encode(hrp_str: &'static str, hex_key: &str) -> Result<String, Nip19Error> {
    let bytes = hex::decode(hex_key)?;
    if bytes.len() != KEY_LEN {
        return Err(Nip19Error::InvalidLength(bytes.len()));
    }
    let hrp = Hrp::parse(hrp_str).map_err(|error| Nip19Error::Encode(error.to_string()))?;
    bech32::encode::<Bech32>(hrp, &bytes).map_err(|error| Nip19Error::Encode(error.to_string()))
}

fn decode(hrp_str: &'static str, encoded: &str) -> Result<String, Nip19Error> {
    let expected = Hrp::parse(hrp_str).map_err(|error| Nip19Error::Decode(error.to_string()))?;
    let (hrp, bytes) =
        bech32::decode(encoded).map_err(|error| Nip19Error::Decode(error.to_string()))?;
    if hrp != expected {
        return Err(Nip19Error::WrongPrefix {
            expected: hrp_str,
            actual: hrp.to_string(),
        });
    }
    if bytes.len() != KEY_LEN {
        return Err(Nip19Error::InvalidLength(bytes.len()));
    }
    Ok(hex::encode(bytes))
}

/// Encode a hex public key as `npub1...`.
pub fn npub_encode(pubkey_hex: &str) -> Result<String, Nip19Error> {
    encode(NPUB_HRP, pubkey_hex)
}

/// Decode an `npub1...` string back to a hex public key.
pub fn npub_decode(npub: &str) -> Result<String, Nip19Error> {
    decode(NPUB_HRP, npub)
}

/// Encode a hex secret key as `nsec1...`.
pub fn nsec_encode(secret_hex: &str) -> Result<String, Nip19Error> {
    encode(NSEC_HRP, secret_hex)
}

/// Decode an `nsec1...` string back to a hex secret key.
pub fn nsec_decode(nsec: &str) -> Result<String, Nip19Error> {
    decode(NSEC_HRP, nsec)
}
