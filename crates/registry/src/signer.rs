//! Signing strategies.
//!
//! Every outgoing event goes through exactly one of three signers, fixed at
//! login and replaced only by the next login or logout:
//!
//! - [`LocalKeySigner`]: a freshly generated in-memory key; the only copy,
//!   lost when the session ends.
//! - [`ExtensionSigner`]: delegates each signature to a user-held external
//!   capability which may interactively deny the request.
//! - [`DelegatedSigner`]: fronts the external login service; signs locally
//!   when a signup flow handed a key back, otherwise round-trips through
//!   the service.
//!
//! A strategy never falls back to another one: failures surface to the
//! caller as-is.

use std::sync::Arc;

use async_trait::async_trait;
use nostr::{Event, EventTemplate, SecretKey, finalize_event, get_public_key_hex};
use thiserror::Error;

use crate::auth::LoginWidget;

/// Why a signature could not be produced.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The user rejected the request in the external capability. Callers
    /// surface this as its own user-actionable condition, not a generic
    /// failure.
    #[error("signing request denied by the user")]
    Denied,

    #[error("no signing capability is available")]
    Unavailable,

    #[error("no private key is held for the active identity")]
    MissingKey,

    #[error("event signing failed: {0}")]
    Signing(#[from] nostr::Nip01Error),

    #[error("signing backend error: {0}")]
    Backend(String),
}

/// One signing strategy: turns an unsigned template into a signed event.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Hex public key of the identity this signer produces events for.
    fn public_key(&self) -> &str;

    async fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError>;
}

/// External signing capability held outside the session (NIP-07 style).
///
/// The session never sees the private key behind it; both operations may be
/// interactively denied by the user.
#[async_trait]
pub trait ExtensionCapability: Send + Sync {
    async fn get_public_key(&self) -> Result<String, SignerError>;

    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, SignerError>;
}

/// Signs with an in-memory secret key.
pub struct LocalKeySigner {
    secret_key: SecretKey,
    public_key: String,
}

impl LocalKeySigner {
    /// Generate a fresh keypair. The key exists nowhere else.
    pub fn generate() -> Self {
        Self::new(nostr::generate_secret_key())
    }

    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = get_public_key_hex(&secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        Ok(finalize_event(template, &self.secret_key)?)
    }
}

/// Delegates every signature to the external capability.
pub struct ExtensionSigner {
    capability: Arc<dyn ExtensionCapability>,
    public_key: String,
}

impl ExtensionSigner {
    pub fn new(capability: Arc<dyn ExtensionCapability>, public_key: String) -> Self {
        Self {
            capability,
            public_key,
        }
    }
}

#[async_trait]
impl Signer for ExtensionSigner {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        self.capability.sign_event(template).await
    }
}

/// Signs on behalf of an identity managed by the external login service.
pub struct DelegatedSigner {
    widget: Arc<dyn LoginWidget>,
    public_key: String,
    handed_key: Option<SecretKey>,
}

impl DelegatedSigner {
    pub fn new(
        widget: Arc<dyn LoginWidget>,
        public_key: String,
        handed_key: Option<SecretKey>,
    ) -> Self {
        Self {
            widget,
            public_key,
            handed_key,
        }
    }

    /// Whether a signup flow handed the key over for local custody.
    pub fn holds_key(&self) -> bool {
        self.handed_key.is_some()
    }
}

#[async_trait]
impl Signer for DelegatedSigner {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        match &self.handed_key {
            Some(secret_key) => Ok(finalize_event(template, secret_key)?),
            None => self.widget.sign_event(template).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::validate_event;

    fn template() -> EventTemplate {
        EventTemplate {
            kind: 42,
            created_at: 1_700_000_000,
            tags: vec![],
            content: "hello".to_string(),
        }
    }

    struct RefusingWidget;

    #[async_trait]
    impl LoginWidget for RefusingWidget {
        async fn launch(&self) -> Result<(), SignerError> {
            Ok(())
        }

        async fn logout(&self) {}

        async fn sign_event(&self, _template: &EventTemplate) -> Result<Event, SignerError> {
            Err(SignerError::Denied)
        }
    }

    #[tokio::test]
    async fn local_signer_produces_valid_events() {
        let signer = LocalKeySigner::generate();
        let event = signer.sign(&template()).await.unwrap();
        assert_eq!(event.pubkey, signer.public_key());
        validate_event(&event).unwrap();
    }

    #[tokio::test]
    async fn delegated_signer_with_handed_key_signs_locally() {
        let secret_key = nostr::generate_secret_key();
        let public_key = get_public_key_hex(&secret_key);
        let signer = DelegatedSigner::new(
            Arc::new(RefusingWidget),
            public_key.clone(),
            Some(secret_key),
        );
        assert!(signer.holds_key());

        // The widget would deny; the handed-back key signs instead.
        let event = signer.sign(&template()).await.unwrap();
        assert_eq!(event.pubkey, public_key);
        validate_event(&event).unwrap();
    }

    #[tokio::test]
    async fn delegated_signer_without_key_round_trips_the_widget() {
        let signer = DelegatedSigner::new(Arc::new(RefusingWidget), "pk".to_string(), None);
        assert!(!signer.holds_key());
        assert!(matches!(
            signer.sign(&template()).await,
            Err(SignerError::Denied)
        ));
    }
}
