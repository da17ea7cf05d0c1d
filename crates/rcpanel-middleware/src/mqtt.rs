//! MQTT-over-WebSocket transport.
//!
//! [`MqttTransport::connect`] returns two halves:
//!
//! * the [`MqttTransport`] itself, a cheap synchronous [`Transport`] that the
//!   debouncer publishes through (`try_publish`, QoS 0, never retained);
//! * an [`MqttEventLoop`] that must be spawned on the Tokio runtime. It drives
//!   the socket, flips the shared `connected` flag on CONNACK / errors, and
//!   reports every change on the [`StatusBus`].
//!
//! The client library reconnects on the next poll after an error; the event
//! loop only waits a fixed [`RETRY_DELAY`] between attempts.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rcpanel_types::{RcError, StatusKind, Transport};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::bus::StatusBus;

/// Pause between a connection error and the next attempt.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Smallest keep-alive the client library accepts.
const MIN_KEEPALIVE: Duration = Duration::from_secs(5);

/// Outbound request queue size inside the client.
const REQUEST_CAPACITY: usize = 32;

/// Where and how to reach the broker.
#[derive(Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket path, always starting with `/`.
    pub path: String,
    pub keepalive: Duration,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
}

impl BrokerConfig {
    /// `wss://host:port/path`
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("wss://{}:{}{}", self.host, self.port, path)
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.url(), self.port);
        options.set_transport(rumqttc::Transport::wss_with_default_config());
        options.set_keep_alive(self.keepalive.max(MIN_KEEPALIVE));
        options.set_clean_session(true);
        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            let pass = self
                .password
                .as_ref()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            options.set_credentials(user, pass);
        }
        options
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("keepalive", &self.keepalive)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.as_ref().is_none_or(|p| p.is_empty()) {
                    &"<not set>"
                } else {
                    &"<redacted>"
                },
            )
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 8081,
            path: "/mqtt".to_string(),
            keepalive: Duration::from_secs(30),
            username: None,
            password: None,
        }
    }
}

/// Random client identifier, `rc_web_<12 hex>`.
pub fn client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("rc_web_{}", &id[..12])
}

/// Publish half of the MQTT connection.
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Build the client. Nothing touches the network until the returned
    /// [`MqttEventLoop`] is run.
    pub fn connect(config: &BrokerConfig, bus: StatusBus) -> (Arc<Self>, MqttEventLoop) {
        let id = client_id();
        info!(url = %config.url(), client_id = %id, "configuring MQTT client");
        let (client, eventloop) = AsyncClient::new(config.options(&id), REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let transport = Arc::new(Self {
            client,
            connected: Arc::clone(&connected),
        });
        let driver = MqttEventLoop {
            eventloop,
            connected,
            bus,
            url: config.url(),
        };
        (transport, driver)
    }

    /// Politely close the session with the broker.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "disconnect request not queued");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), RcError> {
        if !self.is_connected() {
            return Err(RcError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| RcError::Transport(e.to_string()))
    }
}

/// Connection driver. Spawn [`MqttEventLoop::run`] on the Tokio runtime.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    bus: StatusBus,
    url: String,
}

impl MqttEventLoop {
    /// Poll the connection until `shutdown` becomes `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.bus.publish(StatusKind::Connecting {
            url: self.url.clone(),
        });
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    // Sender dropped.
                    if changed.is_err() {
                        break;
                    }
                }
                polled = self.eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            self.set_connected(true);
                        } else {
                            warn!(code = ?ack.code, "broker refused connection");
                            self.bus.publish(StatusKind::TransportError(format!("{:?}", ack.code)));
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => self.set_connected(false),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error");
                        self.set_connected(false);
                        self.bus.publish(StatusKind::TransportError(e.to_string()));
                        self.bus.publish(StatusKind::Reconnecting);
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(RETRY_DELAY) => {}
                        }
                    }
                },
            }
        }
        self.set_connected(false);
        info!("MQTT event loop stopped");
    }

    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            info!(connected, "MQTT link state changed");
            self.bus.publish(if connected {
                StatusKind::Connected
            } else {
                StatusKind::Disconnected
            });
        }
    }
}
