//! Relay pool for multi-relay fanout.
//!
//! Every publish and subscribe operation fans out to the full relay set.
//! Individual relay failures are non-fatal: the pool keeps operating on
//! whichever relays remain reachable.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use nostr::Event;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::relay::{PublishConfirmation, RelayConfig, RelayConnection};
use crate::subscription::{Subscription, SubscriptionHandle};

/// Relay pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of relays in the pool.
    pub max_relays: usize,
    /// Relay configuration template.
    pub relay_config: RelayConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_relays: 16,
            relay_config: RelayConfig::default(),
        }
    }
}

/// Multi-relay pool.
pub struct RelayPool {
    relays: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
    config: PoolConfig,
}

impl RelayPool {
    /// Create new relay pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            relays: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Add relay URL to pool (not connected until `connect_all`).
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let mut relays = self.relays.write().await;
        if relays.contains_key(url) {
            return Ok(());
        }
        if relays.len() >= self.config.max_relays {
            return Err(ClientError::PoolLimit(self.config.max_relays));
        }
        let relay = RelayConnection::with_config(url, self.config.relay_config.clone())?;
        relays.insert(url.to_string(), Arc::new(relay));
        Ok(())
    }

    /// URLs currently in the pool.
    pub async fn urls(&self) -> Vec<String> {
        self.relays.read().await.keys().cloned().collect()
    }

    /// Connect all relays. Succeeds when at least one relay came up.
    pub async fn connect_all(&self) -> Result<()> {
        let relays = self.snapshot().await;
        let mut successful = 0usize;
        for relay in relays {
            match relay.connect().await {
                Ok(()) => successful += 1,
                Err(error) => debug!("relay connect failed: {}", error),
            }
        }
        if successful == 0 {
            return Err(ClientError::Connection(
                "failed to connect to any relay".to_string(),
            ));
        }
        Ok(())
    }

    /// Disconnect all relays.
    pub async fn disconnect_all(&self) -> Result<()> {
        for relay in self.snapshot().await {
            relay.disconnect().await?;
        }
        Ok(())
    }

    /// Publish to every relay and collect one confirmation per relay.
    ///
    /// Transport errors become rejected confirmations so the caller always
    /// sees the full fanout picture.
    pub async fn publish(&self, event: &Event) -> Result<Vec<PublishConfirmation>> {
        let relays = self.snapshot().await;
        if relays.is_empty() {
            return Err(ClientError::NotConnected);
        }

        let attempts = relays.into_iter().map(|relay| {
            let event = event.clone();
            async move {
                match relay.publish(&event).await {
                    Ok(confirmation) => confirmation,
                    Err(error) => PublishConfirmation {
                        relay_url: relay.url().to_string(),
                        event_id: event.id.clone(),
                        accepted: false,
                        message: error.to_string(),
                    },
                }
            }
        });
        Ok(join_all(attempts).await)
    }

    /// Publish to every relay, resolving on the first acceptance.
    ///
    /// This is a race, not a join: the fastest accepting relay wins and
    /// slower relays are not waited on. Fails only when every relay
    /// rejected the event or errored. No retries are attempted.
    pub async fn publish_any(&self, event: &Event) -> Result<PublishConfirmation> {
        let relays = self.snapshot().await;
        let attempts: FuturesUnordered<_> = relays
            .into_iter()
            .map(|relay| {
                let event = event.clone();
                async move { relay.publish(&event).await }
            })
            .collect();
        first_accepted(attempts).await
    }

    /// Register a subscription on every relay and return its handle.
    ///
    /// Relays that fail to accept the request are skipped; the call errors
    /// only when no relay accepted.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<SubscriptionHandle> {
        let relays = self.snapshot().await;
        if relays.is_empty() {
            return Err(ClientError::NotConnected);
        }

        let subscription_id = subscription.id.clone();
        let cancelled = subscription.cancellation();
        let mut accepted = Vec::new();
        for relay in relays {
            match relay.subscribe(subscription.clone()).await {
                Ok(()) => accepted.push(relay),
                Err(error) => debug!("subscribe on {} failed: {}", relay.url(), error),
            }
        }
        if accepted.is_empty() {
            return Err(ClientError::Subscription(
                "no relay accepted the subscription".to_string(),
            ));
        }
        Ok(SubscriptionHandle::new(subscription_id, cancelled, accepted))
    }

    /// Get relay by URL.
    pub async fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
        self.relays.read().await.get(url).cloned()
    }

    async fn snapshot(&self) -> Vec<Arc<RelayConnection>> {
        self.relays.read().await.values().cloned().collect()
    }
}

/// Resolve with the first accepted confirmation from a set of concurrent
/// publish attempts; once every attempt has completed without an
/// acceptance, the whole publish has failed.
pub(crate) async fn first_accepted<F>(
    mut attempts: FuturesUnordered<F>,
) -> Result<PublishConfirmation>
where
    F: Future<Output = Result<PublishConfirmation>>,
{
    let attempted = attempts.len();
    if attempted == 0 {
        return Err(ClientError::NotConnected);
    }

    while let Some(outcome) = attempts.next().await {
        match outcome {
            Ok(confirmation) if confirmation.accepted => return Ok(confirmation),
            Ok(confirmation) => debug!(
                "relay {} rejected {}: {}",
                confirmation.relay_url, confirmation.event_id, confirmation.message
            ),
            Err(error) => debug!("publish attempt failed: {}", error),
        }
    }
    Err(ClientError::AllRelaysFailed { attempted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use nostr::Event;
    use std::time::Duration;

    fn sample_event() -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 42,
            tags: vec![],
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    fn confirmation(relay_url: &str, accepted: bool) -> PublishConfirmation {
        PublishConfirmation {
            relay_url: relay_url.to_string(),
            event_id: "id".to_string(),
            accepted,
            message: if accepted { "saved" } else { "rejected" }.to_string(),
        }
    }

    type Attempt = BoxFuture<'static, Result<PublishConfirmation>>;

    #[tokio::test]
    async fn add_relay_is_idempotent_and_bounded() {
        let pool = RelayPool::new(PoolConfig {
            max_relays: 2,
            relay_config: RelayConfig::default(),
        });

        pool.add_relay("wss://a.example").await.unwrap();
        pool.add_relay("wss://a.example").await.unwrap();
        pool.add_relay("wss://b.example").await.unwrap();
        assert_eq!(pool.urls().await.len(), 2);

        assert!(matches!(
            pool.add_relay("wss://c.example").await,
            Err(ClientError::PoolLimit(2))
        ));
    }

    #[tokio::test]
    async fn operations_on_empty_pool_fail() {
        let pool = RelayPool::new(PoolConfig::default());
        assert!(matches!(
            pool.publish(&sample_event()).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            pool.publish_any(&sample_event()).await,
            Err(ClientError::NotConnected)
        ));
        let subscription = Subscription::new("sub", vec![], Arc::new(|_event| Ok(())));
        assert!(matches!(
            pool.subscribe(subscription).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_wins_without_waiting_for_slow_relays() {
        let attempts: FuturesUnordered<Attempt> = FuturesUnordered::new();
        // Relay A: unreachable, fails immediately.
        attempts.push(async { Err(ClientError::NotConnected) }.boxed());
        // Relay B: accepts after a short delay.
        attempts.push(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(confirmation("wss://b.example/", true))
            }
            .boxed(),
        );
        // Relay C: rejects immediately.
        attempts.push(async { Ok(confirmation("wss://c.example/", false)) }.boxed());
        // Relay D: would accept, but only after an hour. The race must not
        // wait for it.
        attempts.push(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(confirmation("wss://d.example/", true))
            }
            .boxed(),
        );

        let started = tokio::time::Instant::now();
        let winner = first_accepted(attempts).await.unwrap();
        assert_eq!(winner.relay_url, "wss://b.example/");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn all_failures_resolve_to_an_error_result() {
        let attempts: FuturesUnordered<Attempt> = FuturesUnordered::new();
        attempts.push(async { Err(ClientError::NotConnected) }.boxed());
        attempts.push(async { Ok(confirmation("wss://a.example/", false)) }.boxed());
        attempts.push(
            async { Err(ClientError::WebSocket("reset by peer".to_string())) }.boxed(),
        );

        assert!(matches!(
            first_accepted(attempts).await,
            Err(ClientError::AllRelaysFailed { attempted: 3 })
        ));
    }
}
