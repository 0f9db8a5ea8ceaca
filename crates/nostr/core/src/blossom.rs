//! Blossom media-server authorization events.
//!
//! Blossom servers accept an upload when the request carries a signed
//! kind-24242 event naming the action (`t` tag) and the SHA-256 of the
//! payload (`x` tag), base64-encoded into an `Authorization: Nostr ...`
//! header. Only the event-building side lives here; the HTTP flow is the
//! registry's upload client.

use crate::nip01::{EventTemplate, unix_now_secs};
use crate::tag_parsing::find_tag_value;

/// Kind reserved for media-server authorization events.
pub const KIND_BLOSSOM_AUTH: u16 = 24242;

/// Action marker for uploads, carried in the `t` tag.
pub const ACTION_UPLOAD: &str = "upload";

/// Build the unsigned authorization template for uploading a blob.
///
/// `sha256_hex` is the lowercase hex digest of the exact bytes that will be
/// sent; servers reject uploads whose body hash differs.
pub fn upload_authorization(file_name: &str, sha256_hex: &str) -> EventTemplate {
    EventTemplate {
        kind: KIND_BLOSSOM_AUTH,
        created_at: unix_now_secs().unwrap_or(0),
        tags: vec![
            vec!["t".to_string(), ACTION_UPLOAD.to_string()],
            vec!["x".to_string(), sha256_hex.to_string()],
        ],
        content: format!("Upload image: {file_name} (SHA256: {sha256_hex})"),
    }
}

/// Whether a template authorizes the given action.
pub fn authorizes(template: &EventTemplate, action: &str) -> bool {
    template.kind == KIND_BLOSSOM_AUTH && find_tag_value(&template.tags, "t") == Some(action)
}

/// The payload hash an authorization template covers.
pub fn authorized_hash(template: &EventTemplate) -> Option<&str> {
    find_tag_value(&template.tags, "x")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_authorization_layout() {
        let digest = "a".repeat(64);
        let template = upload_authorization("fluffy.png", &digest);

        assert_eq!(template.kind, KIND_BLOSSOM_AUTH);
        assert!(authorizes(&template, ACTION_UPLOAD));
        assert!(!authorizes(&template, "delete"));
        assert_eq!(authorized_hash(&template), Some(digest.as_str()));
        assert!(template.content.contains("fluffy.png"));
        assert!(template.content.contains(&digest));
    }
}
