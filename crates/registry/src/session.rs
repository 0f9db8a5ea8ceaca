//! Relay session: identity, signing and the publish/subscribe surface.
//!
//! One session is created at application start and injected into every
//! consumer; it owns the relay pool and the login state. The rest of the
//! application only ever needs its two primitives, `publish` and
//! `subscribe_to_events`, plus the login operations.
//!
//! Login state machine:
//!
//! ```text
//! LOGGED_OUT --login_local-->     LOGGED_IN(local)
//! LOGGED_OUT --login_extension--> LOGGED_IN(extension)   [rolls back on absence/denial]
//! LOGGED_OUT --login_delegated--> (async notification) --> LOGGED_IN(delegated)
//! LOGGED_IN(*) --logout-->        LOGGED_OUT
//! ```
//!
//! Login handlers overwrite state unconditionally, so switching identities
//! is an implicit logout.

use std::sync::{Arc, Weak};

use nostr::{Event, EventTemplate, Filter, SecretKey, unix_now_secs};
use nostr_client::{
    ClientError, EventCallback, PoolConfig, RelayPool, Subscription, SubscriptionHandle,
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AuthNotification, LoginWidget};
use crate::error::SessionError;
use crate::records::{self, KIND_REGISTRY_RECORD};
use crate::signer::{DelegatedSigner, ExtensionCapability, ExtensionSigner, LocalKeySigner, Signer};

/// Relay endpoints used when the caller does not supply a set.
pub const DEFAULT_RELAY_URLS: [&str; 4] = [
    "wss://relay.damus.io",
    "wss://relay.primal.net",
    "wss://nos.lol",
    "wss://relay.snort.social",
];

/// How the active identity signs events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Local,
    Extension,
    Delegated,
}

/// At most one active identity.
///
/// Invariant: `secret_key` is only ever populated for the local strategy;
/// every other strategy sources signatures externally.
#[derive(Default)]
struct SessionState {
    public_key: Option<String>,
    secret_key: Option<SecretKey>,
    login_method: Option<LoginMethod>,
}

struct SessionInner {
    pool: RwLock<Arc<RelayPool>>,
    relays: RwLock<Vec<String>>,
    state: RwLock<SessionState>,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    extension: RwLock<Option<Arc<dyn ExtensionCapability>>>,
    widget: RwLock<Option<Arc<dyn LoginWidget>>>,
    /// Private key handed over by a delegated signup, retained exactly once
    /// per delegated session. Kept out of `SessionState` so the local-only
    /// invariant on `secret_key` holds.
    handed_key: RwLock<Option<SecretKey>>,
}

/// The process-wide relay session.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Session over the default relay set. Nothing connects until
    /// [`Session::connect`].
    pub fn new() -> Self {
        Self::with_relays(DEFAULT_RELAY_URLS.iter().map(|url| url.to_string()).collect())
    }

    /// Session over a custom relay set.
    pub fn with_relays(relays: Vec<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                pool: RwLock::new(Arc::new(RelayPool::new(PoolConfig::default()))),
                relays: RwLock::new(relays),
                state: RwLock::new(SessionState::default()),
                signer: RwLock::new(None),
                extension: RwLock::new(None),
                widget: RwLock::new(None),
                handed_key: RwLock::new(None),
            }),
        }
    }

    // -----------------------------------------------------------------
    // Relay set
    // -----------------------------------------------------------------

    /// Register the relay set with the pool and connect. Succeeds when at
    /// least one relay came up; unreachable relays degrade silently.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let pool = self.pool().await;
        let urls = self.inner.relays.read().await.clone();
        for url in &urls {
            pool.add_relay(url).await?;
        }
        pool.connect_all().await?;
        Ok(())
    }

    /// Tear down every relay connection.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.pool().await.disconnect_all().await?;
        Ok(())
    }

    /// The current relay set.
    pub async fn relays(&self) -> Vec<String> {
        self.inner.relays.read().await.clone()
    }

    /// Replace the relay set. The previous pool is torn down; call
    /// [`Session::connect`] to bring the new set up.
    pub async fn set_relays(&self, urls: Vec<String>) -> Result<(), SessionError> {
        let fresh = Arc::new(RelayPool::new(PoolConfig::default()));
        for url in &urls {
            fresh.add_relay(url).await?;
        }
        *self.inner.relays.write().await = urls;

        let previous = {
            let mut pool = self.inner.pool.write().await;
            std::mem::replace(&mut *pool, fresh)
        };
        if let Err(error) = previous.disconnect_all().await {
            debug!("disconnecting previous relay set failed: {}", error);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------

    /// Generate a fresh in-memory keypair and log in with it. The key is
    /// the only copy and is gone when the session ends.
    pub async fn login_local(&self) -> String {
        let signer = LocalKeySigner::generate();
        let public_key = signer.public_key().to_string();
        let secret_key = *signer.secret_key();
        self.install_identity(
            public_key.clone(),
            Some(secret_key),
            LoginMethod::Local,
            Arc::new(signer),
        )
        .await;
        public_key
    }

    /// Make the external signing capability available to the session.
    pub async fn attach_extension(&self, capability: Arc<dyn ExtensionCapability>) {
        *self.inner.extension.write().await = Some(capability);
    }

    /// Whether an external signing capability has been detected.
    pub async fn extension_ready(&self) -> bool {
        self.inner.extension.read().await.is_some()
    }

    /// Log in through the external signing capability. The session never
    /// holds the private key. On absence or denial the session rolls back
    /// to fully logged-out; there is no partially logged-in state.
    pub async fn login_extension(&self) -> Result<String, SessionError> {
        let capability = self
            .inner
            .extension
            .read()
            .await
            .clone()
            .ok_or(SessionError::ExtensionUnavailable)?;

        match capability.get_public_key().await {
            Ok(public_key) => {
                let signer = ExtensionSigner::new(capability, public_key.clone());
                self.install_identity(
                    public_key.clone(),
                    None,
                    LoginMethod::Extension,
                    Arc::new(signer),
                )
                .await;
                Ok(public_key)
            }
            Err(error) => {
                self.clear_identity().await;
                Err(SessionError::Signing(error))
            }
        }
    }

    /// Wire up the external login service. The session listens on the
    /// notification channel for the rest of its life, translating identity
    /// changes into state transitions.
    pub async fn attach_login_widget(
        &self,
        widget: Arc<dyn LoginWidget>,
        notifications: mpsc::UnboundedReceiver<AuthNotification>,
    ) {
        *self.inner.widget.write().await = Some(widget);
        spawn_auth_loop(Arc::downgrade(&self.inner), notifications);
    }

    /// Open the external login flow. Completion arrives asynchronously as
    /// an [`AuthNotification`]; this call only launches the flow.
    pub async fn login_delegated(&self) -> Result<(), SessionError> {
        let widget = self
            .inner
            .widget
            .read()
            .await
            .clone()
            .ok_or(SessionError::WidgetUnattached)?;
        widget.launch().await.map_err(SessionError::Signing)
    }

    /// Clear the active identity entirely.
    pub async fn logout(&self) {
        let method = self.inner.state.read().await.login_method;
        self.clear_identity().await;
        if method == Some(LoginMethod::Delegated)
            && let Some(widget) = self.inner.widget.read().await.clone()
        {
            widget.logout().await;
        }
    }

    // -----------------------------------------------------------------
    // Identity accessors
    // -----------------------------------------------------------------

    pub async fn public_key(&self) -> Option<String> {
        self.inner.state.read().await.public_key.clone()
    }

    /// The held private key, present only for the local strategy.
    pub async fn secret_key(&self) -> Option<SecretKey> {
        self.inner.state.read().await.secret_key
    }

    pub async fn login_method(&self) -> Option<LoginMethod> {
        self.inner.state.read().await.login_method
    }

    /// Display form of the active identity.
    pub async fn npub(&self) -> Option<String> {
        let public_key = self.inner.state.read().await.public_key.clone()?;
        nostr::npub_encode(&public_key).ok()
    }

    // -----------------------------------------------------------------
    // Publish / subscribe
    // -----------------------------------------------------------------

    /// Build, sign and publish an event.
    ///
    /// The template is stamped with the current identity and timestamp and
    /// signed by the active strategy; the signed event races across every
    /// relay and the call resolves on the first acceptance. When every
    /// relay rejects or is unreachable the caller gets
    /// [`SessionError::PublishRejected`] to surface inline; the session
    /// never retries.
    pub async fn publish(
        &self,
        kind: u16,
        content: impl Into<String>,
        tags: Vec<Vec<String>>,
    ) -> Result<Event, SessionError> {
        let signer = self
            .inner
            .signer
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotLoggedIn)?;

        let template = EventTemplate {
            kind,
            created_at: unix_now_secs().unwrap_or(0),
            tags,
            content: content.into(),
        };
        let event = signer.sign(&template).await.map_err(SessionError::Signing)?;

        let pool = self.pool().await;
        let confirmation = pool.publish_any(&event).await.map_err(|error| match error {
            ClientError::AllRelaysFailed { .. } => SessionError::PublishRejected,
            other => SessionError::Transport(other),
        })?;
        debug!(
            "event {} accepted by {}",
            confirmation.event_id, confirmation.relay_url
        );
        Ok(event)
    }

    /// Open a live subscription with the given filter on every relay.
    ///
    /// Returns immediately; `on_event` runs once per event each relay
    /// delivers, duplicates across relays included; consumers merge by id.
    /// The handle cancels delivery and releases relay resources and is safe
    /// to invoke repeatedly.
    pub async fn subscribe_to_events<F>(
        &self,
        filter: &Filter,
        on_event: F,
    ) -> Result<SubscriptionHandle, SessionError>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| {
            on_event(event);
            Ok(())
        });
        let subscription = Subscription::new(
            Uuid::new_v4().to_string(),
            vec![filter.to_value()],
            callback,
        );
        Ok(self.pool().await.subscribe(subscription).await?)
    }

    /// Post a message to a group channel.
    pub async fn send_group_message(
        &self,
        channel_id: &str,
        message: impl Into<String>,
    ) -> Result<Event, SessionError> {
        self.publish(
            KIND_REGISTRY_RECORD,
            message,
            records::chat_message_tags(channel_id),
        )
        .await
    }

    /// Follow a group channel.
    pub async fn subscribe_to_group_channel<F>(
        &self,
        channel_id: &str,
        on_event: F,
    ) -> Result<SubscriptionHandle, SessionError>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribe_to_events(&records::chat_filter(channel_id), on_event)
            .await
    }

    // -----------------------------------------------------------------

    async fn pool(&self) -> Arc<RelayPool> {
        self.inner.pool.read().await.clone()
    }

    async fn install_identity(
        &self,
        public_key: String,
        secret_key: Option<SecretKey>,
        method: LoginMethod,
        signer: Arc<dyn Signer>,
    ) {
        *self.inner.signer.write().await = Some(signer);
        let mut state = self.inner.state.write().await;
        state.public_key = Some(public_key);
        state.secret_key = secret_key;
        state.login_method = Some(method);
    }

    async fn clear_identity(&self) {
        *self.inner.signer.write().await = None;
        *self.inner.handed_key.write().await = None;
        *self.inner.state.write().await = SessionState::default();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_auth_loop(
    inner: Weak<SessionInner>,
    mut notifications: mpsc::UnboundedReceiver<AuthNotification>,
) {
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            apply_auth_notification(&inner, notification).await;
        }
    });
}

async fn apply_auth_notification(inner: &Arc<SessionInner>, notification: AuthNotification) {
    match notification {
        AuthNotification::Login { public_key } => {
            delegated_login(inner, public_key, None).await;
        }
        AuthNotification::Signup {
            public_key,
            secret_key,
        } => {
            let handed = secret_key
                .as_deref()
                .and_then(|hex_key| match nostr::secret_key_from_hex(hex_key) {
                    Ok(key) => Some(key),
                    Err(error) => {
                        warn!("discarding malformed signup key: {}", error);
                        None
                    }
                });
            delegated_login(inner, public_key, handed).await;
        }
        AuthNotification::Logout => {
            *inner.signer.write().await = None;
            *inner.handed_key.write().await = None;
            *inner.state.write().await = SessionState::default();
        }
    }
}

async fn delegated_login(
    inner: &Arc<SessionInner>,
    public_key: String,
    handed: Option<SecretKey>,
) {
    let Some(widget) = inner.widget.read().await.clone() else {
        warn!("delegated login notification with no login service attached");
        return;
    };

    let retained = {
        let mut guard = inner.handed_key.write().await;
        // Retained exactly once: the first handed-back key wins until the
        // session logs out.
        if guard.is_none() && handed.is_some() {
            *guard = handed;
        }
        *guard
    };

    let signer: Arc<dyn Signer> =
        Arc::new(DelegatedSigner::new(widget, public_key.clone(), retained));
    *inner.signer.write().await = Some(signer);

    let mut state = inner.state.write().await;
    state.public_key = Some(public_key);
    state.secret_key = None;
    state.login_method = Some(LoginMethod::Delegated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::SignerError;
    use async_trait::async_trait;
    use nostr::get_public_key_hex;
    use std::time::Duration;

    struct FixedExtension {
        public_key: String,
    }

    #[async_trait]
    impl ExtensionCapability for FixedExtension {
        async fn get_public_key(&self) -> Result<String, SignerError> {
            Ok(self.public_key.clone())
        }

        async fn sign_event(&self, _template: &EventTemplate) -> Result<Event, SignerError> {
            Err(SignerError::Backend("not needed in this test".to_string()))
        }
    }

    struct DenyingExtension;

    #[async_trait]
    impl ExtensionCapability for DenyingExtension {
        async fn get_public_key(&self) -> Result<String, SignerError> {
            Err(SignerError::Denied)
        }

        async fn sign_event(&self, _template: &EventTemplate) -> Result<Event, SignerError> {
            Err(SignerError::Denied)
        }
    }

    /// A login service that always refuses remote signing, so tests can
    /// tell whether a handed-back key was used instead.
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

    async fn wait_for_login(session: &Session) {
        for _ in 0..200 {
            if session.public_key().await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("delegated login never arrived");
    }

    async fn wait_for_logout(session: &Session) {
        for _ in 0..200 {
            if session.public_key().await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("delegated logout never arrived");
    }

    #[tokio::test]
    async fn local_login_holds_the_only_key() {
        let session = Session::with_relays(vec![]);
        let public_key = session.login_local().await;

        assert_eq!(public_key.len(), 64);
        assert_eq!(session.public_key().await, Some(public_key));
        assert_eq!(session.login_method().await, Some(LoginMethod::Local));
        assert!(session.secret_key().await.is_some());
    }

    #[tokio::test]
    async fn extension_login_never_retains_a_key() {
        let session = Session::with_relays(vec![]);
        assert!(!session.extension_ready().await);
        session
            .attach_extension(Arc::new(FixedExtension {
                public_key: "ab".repeat(32),
            }))
            .await;
        assert!(session.extension_ready().await);

        let public_key = session.login_extension().await.unwrap();
        assert_eq!(session.public_key().await, Some(public_key));
        assert_eq!(session.login_method().await, Some(LoginMethod::Extension));
        assert!(session.secret_key().await.is_none());
    }

    #[tokio::test]
    async fn switching_identities_overwrites_the_previous_one() {
        let session = Session::with_relays(vec![]);
        session.login_local().await;
        assert!(session.secret_key().await.is_some());

        session
            .attach_extension(Arc::new(FixedExtension {
                public_key: "cd".repeat(32),
            }))
            .await;
        session.login_extension().await.unwrap();

        // The local key is gone; only the extension identity remains.
        assert!(session.secret_key().await.is_none());
        assert_eq!(session.login_method().await, Some(LoginMethod::Extension));
    }

    #[tokio::test]
    async fn denied_extension_login_rolls_back_completely() {
        let session = Session::with_relays(vec![]);
        session.attach_extension(Arc::new(DenyingExtension)).await;

        assert!(matches!(
            session.login_extension().await,
            Err(SessionError::Signing(SignerError::Denied))
        ));
        assert!(session.public_key().await.is_none());
        assert!(session.login_method().await.is_none());
    }

    #[tokio::test]
    async fn extension_login_without_capability_fails() {
        let session = Session::with_relays(vec![]);
        assert!(matches!(
            session.login_extension().await,
            Err(SessionError::ExtensionUnavailable)
        ));
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let session = Session::with_relays(vec![]);
        session.login_local().await;
        session.logout().await;

        assert!(session.public_key().await.is_none());
        assert!(session.secret_key().await.is_none());
        assert!(session.login_method().await.is_none());
    }

    #[tokio::test]
    async fn publish_requires_a_login() {
        let session = Session::with_relays(vec![]);
        assert!(matches!(
            session.publish(42, "hello", vec![]).await,
            Err(SessionError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn publish_with_no_relays_is_a_transport_failure_after_signing() {
        let session = Session::with_relays(vec![]);
        session.login_local().await;
        // Signing succeeds (local key); the empty pool fails afterwards.
        assert!(matches!(
            session.publish(42, "hello", vec![]).await,
            Err(SessionError::Transport(ClientError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn delegated_notifications_drive_the_state_machine() {
        let session = Session::with_relays(vec![]);
        let (notify, notifications) = mpsc::unbounded_channel();
        session
            .attach_login_widget(Arc::new(RefusingWidget), notifications)
            .await;
        session.login_delegated().await.unwrap();

        notify
            .send(AuthNotification::Login {
                public_key: "ef".repeat(32),
            })
            .unwrap();
        wait_for_login(&session).await;
        assert_eq!(session.login_method().await, Some(LoginMethod::Delegated));
        assert!(session.secret_key().await.is_none());

        notify.send(AuthNotification::Logout).unwrap();
        wait_for_logout(&session).await;
        assert!(session.login_method().await.is_none());
    }

    #[tokio::test]
    async fn signup_key_is_retained_exactly_once() {
        let session = Session::with_relays(vec![]);
        let (notify, notifications) = mpsc::unbounded_channel();
        session
            .attach_login_widget(Arc::new(RefusingWidget), notifications)
            .await;

        let secret_key = nostr::generate_secret_key();
        let public_key = get_public_key_hex(&secret_key);
        notify
            .send(AuthNotification::Signup {
                public_key: public_key.clone(),
                secret_key: Some(hex::encode(secret_key.secret_bytes())),
            })
            .unwrap();
        wait_for_login(&session).await;

        // The widget refuses remote signing, so a successful signature can
        // only come from the retained signup key. The empty pool turns a
        // signed publish into a transport failure, not a signing one.
        assert!(matches!(
            session.publish(42, "hello", vec![]).await,
            Err(SessionError::Transport(ClientError::NotConnected))
        ));

        // A later plain login for the same identity must not drop the key.
        notify
            .send(AuthNotification::Login {
                public_key: public_key.clone(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            session.publish(42, "hello again", vec![]).await,
            Err(SessionError::Transport(ClientError::NotConnected))
        ));

        // The invariant stands: a delegated identity never populates the
        // session-held secret key.
        assert!(session.secret_key().await.is_none());
    }

    #[tokio::test]
    async fn delegated_identity_without_key_round_trips_the_service() {
        let session = Session::with_relays(vec![]);
        let (notify, notifications) = mpsc::unbounded_channel();
        session
            .attach_login_widget(Arc::new(RefusingWidget), notifications)
            .await;

        notify
            .send(AuthNotification::Login {
                public_key: "ab".repeat(32),
            })
            .unwrap();
        wait_for_login(&session).await;

        // No handed-back key: signing goes through the service, which
        // denies it, and the denial surfaces as-is.
        assert!(matches!(
            session.publish(42, "hello", vec![]).await,
            Err(SessionError::Signing(SignerError::Denied))
        ));
    }

    #[tokio::test]
    async fn relay_set_is_shared_and_replaceable() {
        let session = Session::new();
        assert_eq!(session.relays().await.len(), DEFAULT_RELAY_URLS.len());

        session
            .set_relays(vec!["wss://relay.example".to_string()])
            .await
            .unwrap();
        assert_eq!(session.relays().await, vec!["wss://relay.example"]);
    }

    #[tokio::test]
    async fn group_helpers_require_a_login_too() {
        let session = Session::with_relays(vec![]);
        assert!(matches!(
            session.send_group_message("channel", "hi").await,
            Err(SessionError::NotLoggedIn)
        ));
    }
}
