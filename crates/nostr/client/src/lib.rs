//! Multi-relay Nostr client transport.
//!
//! This crate intentionally exposes a small surface:
//! - single relay publish/subscribe over WebSocket with `OK` tracking
//! - multi-relay pool fanout with a first-acceptance publish race
//! - callback subscriptions with idempotent cancellation handles

pub mod error;
pub mod pool;
pub mod relay;
pub mod subscription;

pub use error::{ClientError, Result};
pub use pool::{PoolConfig, RelayPool};
pub use relay::{ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayMessage};
pub use subscription::{EventCallback, Subscription, SubscriptionHandle};
