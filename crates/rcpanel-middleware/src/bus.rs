//! Status bus.
//!
//! Uses [`tokio::sync::broadcast`] so that every watcher (the CLI status
//! printer, a session waiting for reconnects, tests) sees every event without
//! any of them blocking the publisher.

use rcpanel_types::{StatusEvent, StatusKind};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (events buffered before slow receivers lag).
const DEFAULT_CAPACITY: usize = 128;

/// Shared status channel. Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a status change, stamped with the current time.
    ///
    /// Returns the number of receivers handed the event. Having nobody
    /// watching is normal, so that case returns `0` rather than an error.
    pub fn publish(&self, kind: StatusKind) -> usize {
        self.sender.send(StatusEvent::now(kind)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> StatusReceiver {
        StatusReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of a [`StatusBus`] that skips over lag instead of failing.
pub struct StatusReceiver {
    receiver: broadcast::Receiver<StatusEvent>,
}

impl StatusReceiver {
    /// Wait for the next status event.
    ///
    /// Returns `None` once every [`StatusBus`] clone has been dropped.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "status receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
