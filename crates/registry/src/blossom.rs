//! Image upload to a Blossom media server.
//!
//! The server's contract is narrow: PUT the raw bytes with a signed
//! kind-24242 authorization event base64-encoded into the `Authorization`
//! header, get back a JSON body carrying the public URL.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use nostr::Event;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::signer::{Signer, SignerError};

/// Why an upload did not yield a URL.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Signing(#[from] SignerError),

    #[error("serializing authorization event failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("upload response did not include a URL")]
    MissingUrl,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: String,
}

/// Bearer-style header value for an upload: `Nostr <base64(event JSON)>`.
pub fn authorization_header(event: &Event) -> Result<String, UploadError> {
    Ok(format!("Nostr {}", BASE64.encode(serde_json::to_vec(event)?)))
}

/// Guess a content type from the file extension.
pub fn mime_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Client for one Blossom upload endpoint.
pub struct BlossomClient {
    http: reqwest::Client,
    upload_url: String,
}

impl BlossomClient {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            upload_url: upload_url.into(),
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Hash the bytes, sign the authorization with the active strategy and
    /// PUT. Returns the public URL of the stored blob.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
        signer: &dyn Signer,
    ) -> Result<String, UploadError> {
        let sha256_hex = hex::encode(Sha256::digest(&bytes));
        let template = nostr::blossom::upload_authorization(file_name, &sha256_hex);
        let authorization = signer.sign(&template).await?;

        debug!(
            "uploading {} ({} bytes, {}) to {}",
            file_name,
            bytes.len(),
            content_type,
            self.upload_url
        );

        let response = self
            .http
            .put(&self.upload_url)
            .header(CONTENT_TYPE, content_type)
            .header(AUTHORIZATION, authorization_header(&authorization)?)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let payload: UploadResponse = response.json().await?;
        if payload.url.is_empty() {
            return Err(UploadError::MissingUrl);
        }
        Ok(payload.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalKeySigner;
    use nostr::blossom::KIND_BLOSSOM_AUTH;

    #[test]
    fn mime_guessing_by_extension() {
        assert_eq!(mime_type_for("fluffy.PNG"), "image/png");
        assert_eq!(mime_type_for("fluffy.jpeg"), "image/jpeg");
        assert_eq!(mime_type_for("clip.webm"), "video/webm");
        assert_eq!(mime_type_for("mystery"), "application/octet-stream");
        assert_eq!(mime_type_for("archive.tar.gz"), "application/octet-stream");
    }

    #[tokio::test]
    async fn authorization_header_embeds_the_signed_event() {
        let signer = LocalKeySigner::generate();
        let bytes = b"fake image bytes".to_vec();
        let sha256_hex = hex::encode(Sha256::digest(&bytes));
        let template = nostr::blossom::upload_authorization("fluffy.png", &sha256_hex);
        let signed = signer.sign(&template).await.unwrap();

        let header = authorization_header(&signed).unwrap();
        let encoded = header.strip_prefix("Nostr ").unwrap();
        let decoded: Event = serde_json::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();

        assert_eq!(decoded, signed);
        assert_eq!(decoded.kind, KIND_BLOSSOM_AUTH);
        assert_eq!(nostr::find_tag_value(&decoded.tags, "x"), Some(sha256_hex.as_str()));
        assert_eq!(nostr::find_tag_value(&decoded.tags, "t"), Some("upload"));
    }
}
