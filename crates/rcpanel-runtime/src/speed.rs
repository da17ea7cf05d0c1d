//! [`SpeedControl`] – the auxiliary speed parameter.
//!
//! Speed is independent of the drive command: it is published as
//! `speed:<n>` on the same topic whenever it changes, and again each time the
//! transport (re)connects so that a rebooted device picks up the current
//! value.

use std::sync::{Arc, Mutex};

use rcpanel_middleware::StatusBus;
use rcpanel_types::{CommandTopic, RcError, Speed, StatusKind, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct SpeedControl {
    speed: Mutex<Speed>,
    topic: CommandTopic,
    transport: Arc<dyn Transport>,
    bus: StatusBus,
}

impl SpeedControl {
    pub fn new(initial: Speed, topic: CommandTopic, transport: Arc<dyn Transport>, bus: StatusBus) -> Self {
        Self {
            speed: Mutex::new(initial),
            topic,
            transport,
            bus,
        }
    }

    pub fn current(&self) -> Speed {
        self.speed.lock().map(|s| *s).unwrap_or_default()
    }

    /// Store `speed` and publish it.
    ///
    /// Returns `Ok(false)` when the transport is down: the value is kept and
    /// goes out on the next reconnect.
    pub fn set(&self, speed: Speed) -> Result<bool, RcError> {
        if let Ok(mut current) = self.speed.lock() {
            *current = speed;
        }
        self.resend()
    }

    /// Move the speed by `steps` multiples of [`Speed::STEP`].
    pub fn step(&self, steps: i8) -> Result<bool, RcError> {
        self.set(self.current().stepped(steps))
    }

    /// Publish the current value again.
    pub fn resend(&self) -> Result<bool, RcError> {
        if !self.transport.is_connected() {
            return Ok(false);
        }
        let speed = self.current();
        self.transport.publish(self.topic.as_str(), &speed.payload())?;
        debug!(topic = %self.topic, %speed, "speed transmitted");
        self.bus.publish(StatusKind::SpeedSent(speed));
        Ok(true)
    }

    /// Re-send the speed every time the status bus reports a connection.
    pub fn spawn_resend_on_connect(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = this.bus.subscribe();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if event.kind == StatusKind::Connected
                    && let Err(e) = this.resend()
                {
                    warn!(error = %e, "failed to re-send speed after connect");
                }
            }
        })
    }
}
