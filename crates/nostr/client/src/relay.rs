//! Single relay connection management.
//!
//! A connection owns one WebSocket to a relay plus a background receive
//! task. Publishes are acknowledged: the relay's `OK` frame for the event id
//! resolves the caller, so a pool can race acceptances across relays.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use nostr::Event;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, Result};
use crate::subscription::Subscription;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Typed relay-to-client frame.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Notice(String),
    Auth(String),
}

/// Outcome of publishing one event to one relay.
///
/// `accepted == false` covers both explicit rejections and relays that never
/// answered within the ack timeout; transport failures surface as errors
/// instead.
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// How long to wait for the relay's `OK` after sending an event.
    pub ack_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

type AckSender = oneshot::Sender<PublishConfirmation>;

/// Relay connection.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
    pending_acks: Arc<Mutex<HashMap<String, AckSender>>>,
    recv_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        Ok(Self {
            url: parsed_url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect to relay and start the background receive loop.
    pub async fn connect(&self) -> Result<()> {
        let mut state_guard = self.state.write().await;
        if *state_guard == ConnectionState::Connected {
            return Err(ClientError::AlreadyConnected);
        }
        *state_guard = ConnectionState::Connecting;
        drop(state_guard);

        let connect_result = timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| {
            ClientError::Timeout(format!(
                "connection timeout after {:?}",
                self.config.connect_timeout
            ))
        })
        .and_then(|result| result.map_err(|error| ClientError::WebSocket(error.to_string())));

        let (stream, _response) = match connect_result {
            Ok(connected) => connected,
            Err(error) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(error);
            }
        };

        let (writer, mut reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.state.write().await = ConnectionState::Connected;

        let subscriptions = Arc::clone(&self.subscriptions);
        let pending_acks = Arc::clone(&self.pending_acks);
        let state = Arc::clone(&self.state);
        let relay_url = self.url.to_string();

        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match parse_relay_message(text.as_str()) {
                            Ok(Some(message)) => {
                                dispatch(&relay_url, message, &subscriptions, &pending_acks).await;
                            }
                            Ok(None) => {}
                            Err(error) => {
                                warn!("protocol parse error on {}: {}", relay_url, error);
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        debug!("received ping from {} ({} bytes)", relay_url, payload.len());
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {}
                    Ok(Message::Frame(_)) => {}
                    Err(error) => {
                        warn!("websocket read error on {}: {}", relay_url, error);
                        break;
                    }
                }
            }

            // Fail outstanding publishes: dropping the senders resolves
            // their receivers with a closed error.
            pending_acks.lock().await.clear();
            *state.write().await = ConnectionState::Disconnected;
        });

        *self.recv_task.lock().await = Some(task);
        Ok(())
    }

    /// Disconnect from relay and stop background tasks.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer
                .send(Message::Close(None))
                .await
                .map_err(|error| ClientError::WebSocket(error.to_string()))?;
        }

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }

        self.pending_acks.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
        Ok(())
    }

    /// Publish an event and wait for this relay's `OK`.
    ///
    /// Returns `Ok` with `accepted == false` when the relay rejects the
    /// event or stays silent past the ack timeout; `Err` only on transport
    /// failures (not connected, send failed).
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending_acks
            .lock()
            .await
            .insert(event.id.clone(), ack_tx);

        if let Err(error) = self.send_json(&json!(["EVENT", event])).await {
            self.pending_acks.lock().await.remove(&event.id);
            return Err(error);
        }

        match timeout(self.config.ack_timeout, ack_rx).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(_closed)) => Ok(self.rejection(event, "connection closed before OK")),
            Err(_elapsed) => {
                self.pending_acks.lock().await.remove(&event.id);
                Ok(self.rejection(event, "no OK within ack timeout"))
            }
        }
    }

    fn rejection(&self, event: &Event, message: &str) -> PublishConfirmation {
        PublishConfirmation {
            relay_url: self.url.to_string(),
            event_id: event.id.clone(),
            accepted: false,
            message: message.to_string(),
        }
    }

    /// Register and send a subscription request.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        let mut request = vec![json!("REQ"), json!(subscription.id)];
        request.extend(subscription.filters.iter().cloned());
        self.send_json(&Value::Array(request)).await?;
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id.clone(), subscription);
        Ok(())
    }

    /// Close a subscription on the relay.
    ///
    /// The local registration is removed even when the `CLOSE` frame cannot
    /// be sent, so a dead relay cannot keep a subscription alive.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions.lock().await.remove(subscription_id);
        self.send_json(&json!(["CLOSE", subscription_id])).await
    }

    async fn send_json(&self, value: &Value) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

/// Route one parsed frame to the subscription or pending publish it belongs
/// to. Bad callbacks and unsolicited frames are logged and skipped; nothing
/// here aborts the receive loop.
async fn dispatch(
    relay_url: &str,
    message: RelayMessage,
    subscriptions: &Mutex<HashMap<String, Subscription>>,
    pending_acks: &Mutex<HashMap<String, AckSender>>,
) {
    match message {
        RelayMessage::Event(subscription_id, event) => {
            let subscription = { subscriptions.lock().await.get(&subscription_id).cloned() };
            match subscription {
                Some(subscription) => {
                    if let Err(error) = subscription.handle_event(event) {
                        warn!("subscription callback error on {}: {}", relay_url, error);
                    }
                }
                None => {
                    debug!(
                        "event for unknown subscription {} from {}",
                        subscription_id, relay_url
                    );
                }
            }
        }
        RelayMessage::Ok(event_id, accepted, message) => {
            let ack = { pending_acks.lock().await.remove(&event_id) };
            match ack {
                Some(ack) => {
                    let _ = ack.send(PublishConfirmation {
                        relay_url: relay_url.to_string(),
                        event_id,
                        accepted,
                        message,
                    });
                }
                None => {
                    debug!("unsolicited OK for {} from {}", event_id, relay_url);
                }
            }
        }
        RelayMessage::Eose(subscription_id) => {
            if let Some(subscription) = subscriptions.lock().await.get(&subscription_id) {
                subscription.mark_eose();
            }
        }
        RelayMessage::Notice(message) => {
            warn!("notice from {}: {}", relay_url, message);
        }
        RelayMessage::Auth(challenge) => {
            debug!("auth challenge from {} ignored: {}", relay_url, challenge);
        }
    }
}

/// Parse relay protocol JSON text into a typed frame.
///
/// Unknown frame kinds parse to `None`; structurally broken frames are
/// protocol errors.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    let Some(kind) = array.first() else {
        return Ok(None);
    };
    let kind = kind
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    let text_field = |index: usize, what: &str| -> Result<String> {
        array
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Protocol(format!("{kind} frame missing {what}")))
    };

    match kind {
        "EVENT" => {
            let subscription_id = text_field(1, "subscription id")?;
            let payload = array
                .get(2)
                .ok_or_else(|| ClientError::Protocol("EVENT frame missing payload".to_string()))?;
            let event: Event = serde_json::from_value(payload.clone()).map_err(|error| {
                ClientError::Protocol(format!("invalid EVENT payload: {error}"))
            })?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "OK" => {
            let event_id = text_field(1, "event id")?;
            let accepted = array
                .get(2)
                .and_then(Value::as_bool)
                .ok_or_else(|| ClientError::Protocol("OK frame missing accepted flag".to_string()))?;
            let message = text_field(3, "message text")?;
            Ok(Some(RelayMessage::Ok(event_id, accepted, message)))
        }
        "EOSE" => Ok(Some(RelayMessage::Eose(text_field(1, "subscription id")?))),
        "NOTICE" => Ok(Some(RelayMessage::Notice(text_field(1, "message text")?))),
        "AUTH" => Ok(Some(RelayMessage::Auth(text_field(1, "challenge")?))),
        _ => Ok(None),
    }
}
