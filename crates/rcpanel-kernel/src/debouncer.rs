//! [`CommandDebouncer`] – turns a noisy stream of intents into a sparse stream
//! of transmitted commands.
//!
//! A classifier polled at animation-frame rate produces 30–60 samples per
//! second. The debouncer forwards a command when it differs from the last one
//! transmitted, or when the last transmission is older than the policy's
//! minimum interval. The second rule produces periodic heartbeats of an
//! unchanged command so that the receiving device can tell "still driving"
//! from "link lost".
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use rcpanel_kernel::{CommandDebouncer, DebouncePolicy, Decision};
//! use rcpanel_types::{Command, CommandTopic, Modality, RcError, Transport};
//!
//! struct Null;
//! impl Transport for Null {
//!     fn is_connected(&self) -> bool { true }
//!     fn publish(&self, _: &str, _: &str) -> Result<(), RcError> { Ok(()) }
//! }
//!
//! let mut d = CommandDebouncer::new(
//!     DebouncePolicy::for_modality(Modality::Audio),
//!     CommandTopic::for_device("car"),
//! );
//! let t0 = Instant::now();
//! assert_eq!(d.on_intent(&Null, "F", 0.9, t0), Decision::Transmitted(Command::Forward));
//! assert!(!d.on_intent(&Null, "F", 0.9, t0 + Duration::from_millis(200)).is_transmitted());
//! ```

use std::time::Instant;

use rcpanel_types::{Command, CommandTopic, Transport};
use tracing::{debug, warn};

use crate::keyboard::HeldKeys;
use crate::policy::DebouncePolicy;

/// Why a call did not result in a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// The transport is down; the sample was dropped, not queued.
    Disconnected,
    /// Confidence below the policy threshold.
    BelowThreshold,
    /// Empty or unrecognised label.
    NoIntent,
    /// Same command as last time, inside the re-send interval.
    Unchanged,
    /// The transport rejected the publish.
    PublishFailed,
}

/// Outcome of a debouncer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Transmitted(Command),
    Suppressed(Suppression),
}

impl Decision {
    pub fn is_transmitted(&self) -> bool {
        matches!(self, Decision::Transmitted(_))
    }

    pub fn command(&self) -> Option<Command> {
        match self {
            Decision::Transmitted(cmd) => Some(*cmd),
            Decision::Suppressed(_) => None,
        }
    }
}

/// Session-scoped memory of the last transmission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceState {
    last_command: Option<Command>,
    last_transmit: Option<Instant>,
}

impl DebounceState {
    /// The single command currently considered active, if any.
    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    pub fn last_transmit(&self) -> Option<Instant> {
        self.last_transmit
    }

    fn record(&mut self, command: Command, now: Instant) {
        self.last_command = Some(command);
        self.last_transmit = Some(now);
    }
}

/// The Command Debouncer. One instance per control session.
#[derive(Debug)]
pub struct CommandDebouncer {
    policy: DebouncePolicy,
    topic: CommandTopic,
    state: DebounceState,
    pub(crate) held: HeldKeys,
}

impl CommandDebouncer {
    pub fn new(policy: DebouncePolicy, topic: CommandTopic) -> Self {
        Self {
            policy,
            topic,
            state: DebounceState::default(),
            held: HeldKeys::default(),
        }
    }

    pub fn policy(&self) -> &DebouncePolicy {
        &self.policy
    }

    pub fn topic(&self) -> &CommandTopic {
        &self.topic
    }

    pub fn state(&self) -> &DebounceState {
        &self.state
    }

    /// Feed one confidence-rated sample.
    ///
    /// Transmits when the transport is connected, the confidence clears the
    /// threshold, the label maps to a [`Command`], and either the command
    /// differs from the last one sent or more than `min_interval` has passed
    /// since the last transmission.
    pub fn on_intent(
        &mut self,
        transport: &dyn Transport,
        label: &str,
        confidence: f32,
        now: Instant,
    ) -> Decision {
        if !transport.is_connected() {
            return Decision::Suppressed(Suppression::Disconnected);
        }
        if !self.policy.admits(confidence) {
            return Decision::Suppressed(Suppression::BelowThreshold);
        }
        let Some(command) = Command::from_label(label) else {
            return Decision::Suppressed(Suppression::NoIntent);
        };
        if self.state.last_command == Some(command) && !self.interval_elapsed(now) {
            return Decision::Suppressed(Suppression::Unchanged);
        }
        self.transmit(transport, command, now)
    }

    fn interval_elapsed(&self, now: Instant) -> bool {
        match self.state.last_transmit {
            Some(at) => now.saturating_duration_since(at) > self.policy.min_interval,
            None => true,
        }
    }

    /// Publish `command` and, only on success, record it as the active one.
    pub(crate) fn transmit(
        &mut self,
        transport: &dyn Transport,
        command: Command,
        now: Instant,
    ) -> Decision {
        match transport.publish(self.topic.as_str(), command.token()) {
            Ok(()) => {
                self.state.record(command, now);
                debug!(topic = %self.topic, command = %command, "command transmitted");
                Decision::Transmitted(command)
            }
            Err(e) => {
                warn!(topic = %self.topic, command = %command, error = %e, "publish failed; command dropped");
                Decision::Suppressed(Suppression::PublishFailed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rcpanel_types::{Modality, RcError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// In-test transport that records every publish.
    pub(crate) struct Recorder {
        pub connected: AtomicBool,
        pub fail: AtomicBool,
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl Recorder {
        pub fn connected() -> Self {
            Self {
                connected: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn payloads(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
        }
    }

    impl Transport for Recorder {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn publish(&self, topic: &str, payload: &str) -> Result<(), RcError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RcError::Transport("broker refused".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn audio_debouncer() -> CommandDebouncer {
        CommandDebouncer::new(
            DebouncePolicy::new(Some(0.75), ms(1000)),
            CommandTopic::for_device("robotcar_umk1"),
        )
    }

    #[test]
    fn scenario_heartbeat_and_change() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        let t0 = Instant::now();

        assert_eq!(d.on_intent(&link, "F", 0.9, t0), Decision::Transmitted(Command::Forward));
        assert_eq!(
            d.on_intent(&link, "F", 0.95, t0 + ms(200)),
            Decision::Suppressed(Suppression::Unchanged)
        );
        assert_eq!(
            d.on_intent(&link, "F", 0.8, t0 + ms(1200)),
            Decision::Transmitted(Command::Forward)
        );
        assert_eq!(
            d.on_intent(&link, "B", 0.9, t0 + ms(1300)),
            Decision::Transmitted(Command::Backward)
        );
        assert_eq!(link.payloads(), ["F", "F", "B"]);
    }

    #[test]
    fn publishes_on_device_topic() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        d.on_intent(&link, "L", 1.0, Instant::now());
        let sent = link.sent.lock().unwrap();
        assert_eq!(sent[0].0, "rc/robotcar_umk1/cmd");
    }

    #[test]
    fn empty_label_never_transmits() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        assert_eq!(
            d.on_intent(&link, "", 0.99, Instant::now()),
            Decision::Suppressed(Suppression::NoIntent)
        );
        assert!(link.payloads().is_empty());
        assert_eq!(d.state().last_command(), None);
    }

    #[test]
    fn unknown_label_is_no_intent() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        assert_eq!(
            d.on_intent(&link, "_background_noise_", 0.99, Instant::now()),
            Decision::Suppressed(Suppression::NoIntent)
        );
    }

    #[test]
    fn below_threshold_never_transmits() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        let t0 = Instant::now();
        for (i, label) in ["F", "B", "L", "R", "S"].iter().enumerate() {
            let at = t0 + ms(5000 * i as u64);
            assert_eq!(
                d.on_intent(&link, label, 0.74, at),
                Decision::Suppressed(Suppression::BelowThreshold)
            );
        }
        assert!(link.payloads().is_empty());
    }

    #[test]
    fn disconnected_drops_sample_without_touching_state() {
        let link = Recorder::connected();
        link.connected.store(false, Ordering::SeqCst);
        let mut d = audio_debouncer();
        let t0 = Instant::now();

        let before = *d.state();
        assert_eq!(
            d.on_intent(&link, "F", 0.99, t0),
            Decision::Suppressed(Suppression::Disconnected)
        );
        assert_eq!(*d.state(), before);
        assert!(link.payloads().is_empty());

        link.connected.store(true, Ordering::SeqCst);
        assert_eq!(
            d.on_intent(&link, "F", 0.99, t0 + ms(50)),
            Decision::Transmitted(Command::Forward)
        );
    }

    #[test]
    fn publish_failure_keeps_previous_state() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        let t0 = Instant::now();
        d.on_intent(&link, "F", 0.9, t0);

        link.fail.store(true, Ordering::SeqCst);
        assert_eq!(
            d.on_intent(&link, "B", 0.9, t0 + ms(10)),
            Decision::Suppressed(Suppression::PublishFailed)
        );
        assert_eq!(d.state().last_command(), Some(Command::Forward));
        assert_eq!(d.state().last_transmit(), Some(t0));
    }

    #[test]
    fn same_label_never_closer_than_interval() {
        let link = Recorder::connected();
        let mut d = CommandDebouncer::new(
            DebouncePolicy::for_modality(Modality::Image),
            CommandTopic::for_device("car"),
        );
        let t0 = Instant::now();
        let mut sent_at = Vec::new();
        // 60 Hz stream of the same label for three seconds.
        for frame in 0..180u64 {
            let at = t0 + ms(frame * 1000 / 60);
            if d.on_intent(&link, "R", 0.6, at).is_transmitted() {
                sent_at.push(at);
            }
        }
        assert!(sent_at.len() >= 5);
        for pair in sent_at.windows(2) {
            assert!(pair[1] - pair[0] > ms(500));
        }
    }

    #[test]
    fn changed_label_is_sent_immediately() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        let t0 = Instant::now();
        assert!(d.on_intent(&link, "F", 0.9, t0).is_transmitted());
        assert!(d.on_intent(&link, "L", 0.9, t0 + ms(1)).is_transmitted());
        assert!(d.on_intent(&link, "F", 0.9, t0 + ms(2)).is_transmitted());
        assert_eq!(link.payloads(), ["F", "L", "F"]);
    }

    #[test]
    fn exactly_interval_is_not_enough() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        let t0 = Instant::now();
        d.on_intent(&link, "S", 1.0, t0);
        assert!(!d.on_intent(&link, "S", 1.0, t0 + ms(1000)).is_transmitted());
        assert!(d.on_intent(&link, "S", 1.0, t0 + ms(1001)).is_transmitted());
    }

    #[test]
    fn label_is_normalised_before_comparison() {
        let link = Recorder::connected();
        let mut d = audio_debouncer();
        let t0 = Instant::now();
        assert!(d.on_intent(&link, " forward ", 0.9, t0).is_transmitted());
        assert!(!d.on_intent(&link, "f", 0.9, t0 + ms(100)).is_transmitted());
        assert_eq!(link.payloads(), ["F"]);
    }
}
