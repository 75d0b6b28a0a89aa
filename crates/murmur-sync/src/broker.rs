//! Broker abstraction for the push channel.
//!
//! The broker is a topic-based publish/subscribe service with retained
//! messages, persistent sessions and a last-will message. Implementations
//! may wrap an MQTT client or any other transport with those semantics.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Delivery guarantee of a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// Retained messages are replayed to late subscribers.
    pub retain: bool,
}

impl Publish {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// Options for opening a broker connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    /// A non-clean session keeps subscriptions and queued messages across
    /// reconnects.
    pub clean_session: bool,
    /// Published by the broker if the connection drops without a clean
    /// disconnect.
    pub last_will: Option<Publish>,
}

/// Broker client trait.
///
/// Implementations must be thread-safe (Send + Sync). `recv` must be
/// cancel-safe: dropping its future must not lose a message.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a connection. Returns whether the broker resumed an existing
    /// session.
    async fn connect(&self, options: &ConnectOptions) -> Result<bool>;

    /// Close the connection cleanly. The last will is discarded.
    async fn disconnect(&self) -> Result<()>;

    /// Publish a message.
    async fn publish(&self, publish: Publish) -> Result<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;

    /// Remove a subscription. Unknown filters are ignored.
    async fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Receive the next inbound message.
    ///
    /// Returns an error once the connection is gone.
    async fn recv(&self) -> Result<Publish>;
}

/// A simple in-memory broker for testing.
///
/// One [`memory::MemoryBroker`] is shared by any number of
/// [`memory::MemoryBrokerClient`]s, each behaving like a separate network
/// connection.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    use murmur_core::topic_matches;

    use crate::error::TransportError;

    #[derive(Default)]
    struct ClientSession {
        subscriptions: Vec<(String, QoS)>,
        sender: Option<mpsc::UnboundedSender<Publish>>,
        will: Option<Publish>,
        persistent: bool,
        /// Messages held for a persistent session while it is offline.
        queued: Vec<Publish>,
    }

    #[derive(Default)]
    struct BrokerState {
        sessions: HashMap<String, ClientSession>,
        retained: HashMap<String, Publish>,
        published: Vec<Publish>,
        refusing: bool,
    }

    impl BrokerState {
        fn route(&mut self, publish: Publish) {
            if publish.retain {
                if publish.payload.is_empty() {
                    self.retained.remove(&publish.topic);
                } else {
                    self.retained.insert(publish.topic.clone(), publish.clone());
                }
            }

            for session in self.sessions.values_mut() {
                let Some(granted) = session
                    .subscriptions
                    .iter()
                    .filter(|(filter, _)| topic_matches(filter, &publish.topic))
                    .map(|(_, qos)| *qos)
                    .max()
                else {
                    continue;
                };

                // Live delivery carries retain=false.
                let delivered = Publish {
                    qos: publish.qos.min(granted),
                    retain: false,
                    ..publish.clone()
                };
                match &session.sender {
                    Some(sender) => {
                        let _ = sender.send(delivered);
                    }
                    None if session.persistent && delivered.qos > QoS::AtMostOnce => {
                        session.queued.push(delivered);
                    }
                    None => {}
                }
            }

            self.published.push(publish);
        }
    }

    /// Shared broker state.
    pub struct MemoryBroker {
        state: Mutex<BrokerState>,
    }

    impl MemoryBroker {
        /// Create a new memory broker.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a client connection handle for this broker.
        pub fn client(self: &Arc<Self>) -> MemoryBrokerClient {
            MemoryBrokerClient {
                broker: Arc::clone(self),
                client_id: Mutex::new(None),
                receiver: Mutex::new(None),
            }
        }

        /// Publish as the server itself (no client connection needed).
        pub async fn inject(&self, publish: Publish) {
            self.state.lock().await.route(publish);
        }

        /// Refuse (or accept again) new connections.
        pub async fn set_refusing(&self, refusing: bool) {
            self.state.lock().await.refusing = refusing;
        }

        /// Simulate a network failure of one client: the last will is
        /// published and the client's connection is severed.
        pub async fn drop_connection(&self, client_id: &str) {
            let mut state = self.state.lock().await;
            let will = match state.sessions.get_mut(client_id) {
                Some(session) if session.sender.is_some() => {
                    session.sender = None;
                    session.will.take()
                }
                _ => return,
            };
            if let Some(will) = will {
                state.route(will);
            }
        }

        /// Every message published through this broker, in order.
        pub async fn published(&self) -> Vec<Publish> {
            self.state.lock().await.published.clone()
        }

        /// The current retained message of a topic.
        pub async fn retained(&self, topic: &str) -> Option<Publish> {
            self.state.lock().await.retained.get(topic).cloned()
        }

        /// Active subscription filters of a client.
        pub async fn subscriptions(&self, client_id: &str) -> Vec<String> {
            self.state
                .lock()
                .await
                .sessions
                .get(client_id)
                .map(|s| s.subscriptions.iter().map(|(f, _)| f.clone()).collect())
                .unwrap_or_default()
        }

        /// Whether a client currently holds a live connection.
        pub async fn is_online(&self, client_id: &str) -> bool {
            self.state
                .lock()
                .await
                .sessions
                .get(client_id)
                .is_some_and(|s| s.sender.is_some())
        }
    }

    impl Default for MemoryBroker {
        fn default() -> Self {
            Self {
                state: Mutex::new(BrokerState::default()),
            }
        }
    }

    /// One client connection to a [`MemoryBroker`].
    pub struct MemoryBrokerClient {
        broker: Arc<MemoryBroker>,
        client_id: Mutex<Option<String>>,
        receiver: Mutex<Option<mpsc::UnboundedReceiver<Publish>>>,
    }

    impl MemoryBrokerClient {
        async fn connected_id(&self) -> Result<String> {
            self.client_id
                .lock()
                .await
                .clone()
                .ok_or(TransportError::NotConnected)
        }
    }

    #[async_trait]
    impl Broker for MemoryBrokerClient {
        async fn connect(&self, options: &ConnectOptions) -> Result<bool> {
            let mut state = self.broker.state.lock().await;
            if state.refusing {
                return Err(TransportError::ConnectionRefused(
                    "broker is refusing connections".into(),
                ));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let resumed = !options.clean_session && state.sessions.contains_key(&options.client_id);
            if !resumed {
                state.sessions.remove(&options.client_id);
            }

            let session = state.sessions.entry(options.client_id.clone()).or_default();
            session.persistent = !options.clean_session;
            session.will = options.last_will.clone();
            for queued in session.queued.drain(..) {
                let _ = tx.send(queued);
            }
            session.sender = Some(tx);
            drop(state);

            *self.client_id.lock().await = Some(options.client_id.clone());
            *self.receiver.lock().await = Some(rx);
            Ok(resumed)
        }

        async fn disconnect(&self) -> Result<()> {
            let Some(client_id) = self.client_id.lock().await.take() else {
                return Ok(());
            };
            let mut state = self.broker.state.lock().await;
            let forget = match state.sessions.get_mut(&client_id) {
                Some(session) => {
                    session.sender = None;
                    session.will = None;
                    !session.persistent
                }
                None => false,
            };
            if forget {
                state.sessions.remove(&client_id);
            }
            drop(state);
            *self.receiver.lock().await = None;
            Ok(())
        }

        async fn publish(&self, publish: Publish) -> Result<()> {
            let client_id = self.connected_id().await?;
            let mut state = self.broker.state.lock().await;
            if !state
                .sessions
                .get(&client_id)
                .is_some_and(|s| s.sender.is_some())
            {
                return Err(TransportError::ConnectionLost(client_id));
            }
            state.route(publish);
            Ok(())
        }

        async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
            let client_id = self.connected_id().await?;
            let mut state = self.broker.state.lock().await;

            let retained: Vec<Publish> = state
                .retained
                .values()
                .filter(|p| topic_matches(filter, &p.topic))
                .cloned()
                .collect();

            let session = state
                .sessions
                .get_mut(&client_id)
                .ok_or(TransportError::NotConnected)?;
            let Some(sender) = session.sender.clone() else {
                return Err(TransportError::ConnectionLost(client_id));
            };

            session.subscriptions.retain(|(f, _)| f != filter);
            session.subscriptions.push((filter.to_string(), qos));

            for publish in retained {
                let _ = sender.send(Publish {
                    qos: publish.qos.min(qos),
                    ..publish
                });
            }
            Ok(())
        }

        async fn unsubscribe(&self, filter: &str) -> Result<()> {
            let client_id = self.connected_id().await?;
            let mut state = self.broker.state.lock().await;
            if let Some(session) = state.sessions.get_mut(&client_id) {
                session.subscriptions.retain(|(f, _)| f != filter);
            }
            Ok(())
        }

        async fn recv(&self) -> Result<Publish> {
            let mut receiver = self.receiver.lock().await;
            let rx = receiver.as_mut().ok_or(TransportError::NotConnected)?;
            match rx.recv().await {
                Some(publish) => Ok(publish),
                None => {
                    *receiver = None;
                    Err(TransportError::ConnectionLost("connection closed".into()))
                }
            }
        }
    }
}
