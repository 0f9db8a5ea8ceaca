//! Session error types.

use thiserror::Error;

use crate::signer::SignerError;

/// Per-operation session failures, returned to the immediate caller.
///
/// There is no global error channel: callers surface these next to the
/// action that triggered them.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("no signing extension is available")]
    ExtensionUnavailable,

    #[error("no login service is attached")]
    WidgetUnattached,

    /// The active strategy could not produce a signature. Never silently
    /// downgraded to another strategy.
    #[error(transparent)]
    Signing(#[from] SignerError),

    /// Every relay rejected the event or was unreachable. The session does
    /// not retry; retry policy belongs to the caller.
    #[error("every relay rejected the event or was unreachable")]
    PublishRejected,

    #[error("relay transport error: {0}")]
    Transport(#[from] nostr_client::ClientError),
}
