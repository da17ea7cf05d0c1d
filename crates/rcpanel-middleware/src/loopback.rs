//! In-process transport.
//!
//! [`LoopbackTransport`] stands in for the broker: every publish is appended
//! to an in-memory log, and the `connected` flag can be flipped at will to
//! exercise the drop-while-disconnected path. The CLI uses it for
//! `--dry-run`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rcpanel_types::{RcError, StatusKind, Transport};
use tracing::info;

use crate::bus::StatusBus;

/// A message accepted by the loopback transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub payload: String,
}

pub struct LoopbackTransport {
    connected: AtomicBool,
    log: Mutex<Vec<Published>>,
    bus: Option<StatusBus>,
}

impl LoopbackTransport {
    /// A transport that starts connected.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            log: Mutex::new(Vec::new()),
            bus: None,
        }
    }

    /// Report connection changes on `bus`, like the MQTT event loop does.
    pub fn with_status_bus(mut self, bus: StatusBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected
            && let Some(bus) = &self.bus
        {
            bus.publish(if connected {
                StatusKind::Connected
            } else {
                StatusKind::Disconnected
            });
        }
    }

    /// Snapshot of everything published so far.
    pub fn published(&self) -> Vec<Published> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Just the payloads, in publish order.
    pub fn payloads(&self) -> Vec<String> {
        self.published().into_iter().map(|p| p.payload).collect()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), RcError> {
        if !self.is_connected() {
            return Err(RcError::NotConnected);
        }
        info!(topic, payload, "loopback publish");
        let mut log = self
            .log
            .lock()
            .map_err(|_| RcError::Transport("loopback log poisoned".into()))?;
        log.push(Published {
            timestamp: Utc::now(),
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_publishes_in_order() {
        let link = LoopbackTransport::new();
        link.publish("rc/car/cmd", "F").unwrap();
        link.publish("rc/car/cmd", "speed:40").unwrap();
        assert_eq!(link.payloads(), ["F", "speed:40"]);
        assert_eq!(link.published()[0].topic, "rc/car/cmd");
    }

    #[test]
    fn refuses_publish_while_disconnected() {
        let link = LoopbackTransport::new();
        link.set_connected(false);
        assert!(!link.is_connected());
        assert!(matches!(link.publish("t", "F"), Err(RcError::NotConnected)));
        assert!(link.payloads().is_empty());
    }

    #[tokio::test]
    async fn connection_changes_reach_status_bus() -> Result<(), Box<dyn std::error::Error>> {
        let bus = StatusBus::default();
        let mut rx = bus.subscribe();
        let link = LoopbackTransport::new().with_status_bus(bus.clone());

        link.set_connected(false);
        // No change, no event.
        link.set_connected(false);
        link.set_connected(true);

        assert_eq!(rx.recv().await.ok_or("first")?.kind, StatusKind::Disconnected);
        assert_eq!(rx.recv().await.ok_or("second")?.kind, StatusKind::Connected);
        Ok(())
    }
}
