//! MQTT implementation of [`Broker`] using rumqttc.
//!
//! Every [`Broker::connect`] builds a fresh rumqttc client and spawns a
//! driver task that polls its event loop. The driver reports the CONNACK,
//! forwards inbound publishes, and ends on the first connection error.
//! Reconnecting is left to the transport session, so rumqttc's own retry
//! never kicks in.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::{Broker, ConnectOptions, Publish, QoS};
use crate::error::{Result, TransportError};

/// How long a clean disconnect may take to flush before the driver is
/// aborted.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Connection settings for an MQTT broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Use TLS with the platform's root certificates.
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    /// Capacity of rumqttc's request queue.
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            tls: false,
            username: None,
            password: None,
            keep_alive_secs: 60,
            connect_timeout_ms: 10_000,
            request_capacity: 256,
        }
    }
}

impl MqttConfig {
    /// Plain TCP settings for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    fn options(&self, connect: &ConnectOptions) -> MqttOptions {
        let mut options = MqttOptions::new(connect.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_clean_session(connect.clean_session);
        if let Some(will) = &connect.last_will {
            options.set_last_will(LastWill::new(
                will.topic.clone(),
                will.payload.to_vec(),
                to_mqtt_qos(will.qos),
                will.retain,
            ));
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if self.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        options
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct Link {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

type Inbound = mpsc::UnboundedReceiver<Result<Publish>>;

/// A broker connection over MQTT 3.1.1.
pub struct MqttBroker {
    config: MqttConfig,
    link: Mutex<Option<Link>>,
    inbound: Mutex<Option<Inbound>>,
}

impl MqttBroker {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
            inbound: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<AsyncClient> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.client.clone())
            .ok_or(TransportError::NotConnected)
    }
}

/// Poll the event loop until the connection ends.
async fn drive(
    mut events: EventLoop,
    ready: oneshot::Sender<Result<bool>>,
    inbound: mpsc::UnboundedSender<Result<Publish>>,
) {
    let mut ready = Some(ready);
    loop {
        match events.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                let result = if accepted {
                    Ok(ack.session_present)
                } else {
                    Err(TransportError::ConnectionRefused(format!("{:?}", ack.code)))
                };
                if let Some(ready) = ready.take() {
                    let _ = ready.send(result);
                }
                if !accepted {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(packet))) => {
                let publish = Publish {
                    topic: packet.topic,
                    payload: packet.payload,
                    qos: from_mqtt_qos(packet.qos),
                    retain: packet.retain,
                };
                if inbound.send(Ok(publish)).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(TransportError::ConnectionRefused(reason)));
                    }
                    None => {
                        let _ = inbound.send(Err(TransportError::ConnectionLost(reason)));
                    }
                }
                return;
            }
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn connect(&self, options: &ConnectOptions) -> Result<bool> {
        let mut link = self.link.lock().await;
        if let Some(stale) = link.take() {
            stale.driver.abort();
        }

        let (client, events) = AsyncClient::new(
            self.config.options(options),
            self.config.request_capacity.max(1),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(events, ready_tx, inbound_tx));

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let resumed = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionRefused(
                "event loop ended before CONNACK".into(),
            )),
            Err(_) => Err(TransportError::ConnectionRefused(format!(
                "no CONNACK within {timeout:?}"
            ))),
        };
        let resumed = match resumed {
            Ok(resumed) => resumed,
            Err(e) => {
                driver.abort();
                return Err(e);
            }
        };

        debug!(
            client_id = %options.client_id,
            host = %self.config.host,
            port = self.config.port,
            resumed,
            "mqtt connected"
        );
        *link = Some(Link { client, driver });
        *self.inbound.lock().await = Some(inbound_rx);
        Ok(resumed)
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut link) = self.link.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = link.client.disconnect().await {
            warn!(error = %e, "mqtt disconnect request failed");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut link.driver)
            .await
            .is_err()
        {
            link.driver.abort();
        }
        *self.inbound.lock().await = None;
        Ok(())
    }

    async fn publish(&self, publish: Publish) -> Result<()> {
        let client = self.client().await?;
        client
            .publish(
                publish.topic.clone(),
                to_mqtt_qos(publish.qos),
                publish.retain,
                publish.payload.to_vec(),
            )
            .await
            .map_err(|e| TransportError::Publish {
                topic: publish.topic,
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        let client = self.client().await?;
        client
            .subscribe(filter, to_mqtt_qos(qos))
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .unsubscribe(filter)
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn recv(&self) -> Result<Publish> {
        let mut inbound = self.inbound.lock().await;
        let rx = inbound.as_mut().ok_or(TransportError::NotConnected)?;
        match rx.recv().await {
            Some(Ok(publish)) => Ok(publish),
            Some(Err(e)) => {
                *inbound = None;
                Err(e)
            }
            None => {
                *inbound = None;
                Err(TransportError::ConnectionLost("mqtt event loop ended".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_options() -> ConnectOptions {
        ConnectOptions {
            client_id: "alice-device".into(),
            clean_session: false,
            last_will: Some(Publish::new("user/alice/status", "0:1", QoS::ExactlyOnce, true)),
        }
    }

    #[test]
    fn test_options_carry_session_and_will() {
        let options = MqttConfig::new("broker.example.com", 1885).options(&connect_options());

        assert!(!options.clean_session());
        assert_eq!(options.client_id(), "alice-device");
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 1885)
        );

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "user/alice/status");
        assert_eq!(&will.message[..], b"0:1");
        assert_eq!(will.qos, rumqttc::QoS::ExactlyOnce);
        assert!(will.retain);
    }

    #[test]
    fn test_qos_mapping() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: MqttConfig = serde_json::from_str(r#"{"host": "mqtt.local"}"#).unwrap();
        assert_eq!(config.host, "mqtt.local");
        assert_eq!(config.port, 1883);
        assert!(!config.tls);
    }

    #[tokio::test]
    async fn test_requests_before_connect_fail() {
        let broker = MqttBroker::new(MqttConfig::default());
        assert!(matches!(
            broker
                .publish(Publish::new("x/c", "", QoS::AtMostOnce, false))
                .await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(broker.recv().await, Err(TransportError::NotConnected)));
        broker.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_refused() {
        let broker = MqttBroker::new(MqttConfig {
            connect_timeout_ms: 2_000,
            ..MqttConfig::new("127.0.0.1", 1)
        });
        assert!(matches!(
            broker.connect(&connect_options()).await,
            Err(TransportError::ConnectionRefused(_))
        ));
        assert!(matches!(broker.client().await, Err(TransportError::NotConnected)));
    }
}
