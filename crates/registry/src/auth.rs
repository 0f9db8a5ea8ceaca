//! External login service integration.
//!
//! The delegated login service is an opaque collaborator that manages its
//! own identity UI and key custody. The session talks to it through a
//! narrow interface and learns about identity changes from an asynchronous
//! notification channel it listens on for its whole lifetime.

use async_trait::async_trait;
use nostr::{Event, EventTemplate};

use crate::signer::SignerError;

/// Identity change announced by the login service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthNotification {
    /// An existing identity logged in.
    Login { public_key: String },
    /// A new identity was created. The service may hand the freshly
    /// generated private key (hex) over for local custody; it does so at
    /// most once per identity.
    Signup {
        public_key: String,
        secret_key: Option<String>,
    },
    /// The service ended the session on its side.
    Logout,
}

/// Narrow interface to the external login service.
///
/// Notifications arrive on the channel passed to
/// [`crate::session::Session::attach_login_widget`], not through this
/// trait.
#[async_trait]
pub trait LoginWidget: Send + Sync {
    /// Open the external login flow. Completion (or abandonment) is
    /// reported asynchronously via the notification channel.
    async fn launch(&self) -> Result<(), SignerError>;

    /// Tell the service the session logged out.
    async fn logout(&self);

    /// One remote signing round-trip for identities whose key stayed with
    /// the service.
    async fn sign_event(&self, template: &EventTemplate) -> Result<Event, SignerError>;
}
