//! [`ControlSession`] – one modality driving the device.
//!
//! The session owns the [`CommandDebouncer`] (and with it the session-scoped
//! debounce state) behind a mutex. Each [`Intent`] is applied under the lock
//! in one synchronous step, so two producers can never interleave their
//! read-modify-write of the state. The lock is never held across an `.await`:
//! a slow inference only delays the moment the next intent arrives.
//!
//! [`SessionHandle`] runs a session against an [`IntentSource`] as a Tokio
//! task that can be stopped between intents.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rcpanel_kernel::DebouncePolicy;
//! use rcpanel_middleware::{LoopbackTransport, StatusBus};
//! use rcpanel_runtime::{ClassifierSource, ControlSession, ReplayClassifier, SessionHandle, SpeedControl};
//! use rcpanel_types::{CommandTopic, Modality, Speed};
//!
//! # async fn demo() -> Result<(), rcpanel_types::RcError> {
//! let bus = StatusBus::default();
//! let link = Arc::new(LoopbackTransport::new());
//! let topic = CommandTopic::for_device("robotcar_umk1");
//! let speed = Arc::new(SpeedControl::new(Speed::default(), topic.clone(), link.clone(), bus.clone()));
//! let session = Arc::new(ControlSession::new(
//!     Modality::Image,
//!     DebouncePolicy::for_modality(Modality::Image),
//!     topic,
//!     link,
//!     speed,
//!     bus.clone(),
//! ));
//! let replay = ReplayClassifier::new("gestures.jsonl", Duration::from_millis(33));
//! let source = ClassifierSource::start(replay, Modality::Image, bus).await?;
//! let handle = SessionHandle::spawn(session, Box::new(source));
//! let summary = handle.stop().await;
//! println!("{} commands sent", summary.transmitted);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use rcpanel_kernel::{CommandDebouncer, DebouncePolicy, DebounceState, Decision, Suppression};
use rcpanel_middleware::StatusBus;
use rcpanel_types::{CommandTopic, Modality, StatusKind, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::intent_source::{Intent, IntentSource};
use crate::speed::SpeedControl;

/// Counters returned when a session task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub intents: u64,
    pub transmitted: u64,
}

pub struct ControlSession {
    modality: Modality,
    debouncer: Mutex<CommandDebouncer>,
    transport: Arc<dyn Transport>,
    speed: Arc<SpeedControl>,
    bus: StatusBus,
}

impl ControlSession {
    pub fn new(
        modality: Modality,
        policy: DebouncePolicy,
        topic: CommandTopic,
        transport: Arc<dyn Transport>,
        speed: Arc<SpeedControl>,
        bus: StatusBus,
    ) -> Self {
        Self {
            modality,
            debouncer: Mutex::new(CommandDebouncer::new(policy, topic)),
            transport,
            speed,
            bus,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Snapshot of the debounce state.
    pub fn state(&self) -> DebounceState {
        self.debouncer
            .lock()
            .map(|d| *d.state())
            .unwrap_or_default()
    }

    /// Apply one intent. Returns `None` for intents that do not go through
    /// the debouncer (speed adjustments).
    pub fn dispatch(&self, intent: Intent) -> Option<Decision> {
        let decision = match intent {
            Intent::Sample(sample) => {
                self.bus.publish(StatusKind::Detected {
                    label: sample.label.to_ascii_uppercase(),
                    confidence: sample.confidence,
                });
                self.with_debouncer(|d, t| d.on_intent(t, &sample.label, sample.confidence, sample.at))
            }
            Intent::KeyEdge { key, pressed, at } => {
                self.with_debouncer(|d, t| d.on_key_edge(t, key, pressed, at))
            }
            Intent::FocusLost { at } => self.with_debouncer(|d, t| d.on_focus_lost(t, at)),
            Intent::AdjustSpeed(steps) => {
                if let Err(e) = self.speed.step(steps) {
                    warn!(error = %e, "speed change not transmitted");
                }
                return None;
            }
        };
        if let Decision::Transmitted(command) = decision {
            self.bus.publish(StatusKind::CommandSent(command));
        }
        Some(decision)
    }

    /// Forget held keys and send STOP, as if the input surface lost focus.
    pub fn stop_vehicle(&self) -> Decision {
        self.dispatch(Intent::FocusLost { at: Instant::now() })
            .unwrap_or(Decision::Suppressed(Suppression::Disconnected))
    }

    fn with_debouncer(&self, f: impl FnOnce(&mut CommandDebouncer, &dyn Transport) -> Decision) -> Decision {
        match self.debouncer.lock() {
            Ok(mut debouncer) => f(&mut debouncer, self.transport.as_ref()),
            Err(poisoned) => {
                warn!("debouncer lock poisoned; recovering");
                f(&mut poisoned.into_inner(), self.transport.as_ref())
            }
        }
    }

    /// Pull intents from `source` until it ends or `stop` turns `true`.
    pub async fn run(&self, source: &mut dyn IntentSource, mut stop: watch::Receiver<bool>) -> SessionSummary {
        let mut summary = SessionSummary::default();
        info!(modality = %self.modality, "session running");
        self.bus.publish(StatusKind::SessionRunning(self.modality));

        loop {
            if *stop.borrow() {
                break;
            }
            let intent = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                intent = source.next_intent() => intent,
            };
            let Some(intent) = intent else {
                debug!(modality = %self.modality, "intent source ended");
                break;
            };
            summary.intents += 1;
            if self.dispatch(intent).is_some_and(|d| d.is_transmitted()) {
                summary.transmitted += 1;
            }
            // Sources that never suspend must not starve the runtime.
            tokio::task::yield_now().await;
        }

        info!(modality = %self.modality, intents = summary.intents, transmitted = summary.transmitted, "session stopped");
        self.bus.publish(StatusKind::SessionStopped(self.modality));
        summary
    }
}

/// A session running as a Tokio task.
pub struct SessionHandle {
    modality: Modality,
    stop: watch::Sender<bool>,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn spawn(session: Arc<ControlSession>, mut source: Box<dyn IntentSource>) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let modality = session.modality();
        let task = tokio::spawn(async move { session.run(source.as_mut(), stop_rx).await });
        Self {
            modality,
            stop,
            task,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// `true` once the source has ended on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task and wait for it to wind down.
    pub async fn stop(self) -> SessionSummary {
        let _ = self.stop.send(true);
        self.join().await
    }

    /// Wait for the source to end without signalling.
    pub async fn join(self) -> SessionSummary {
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(modality = %self.modality, error = %e, "session task failed");
                SessionSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent_source::ScriptedSource;
    use async_trait::async_trait;
    use rcpanel_middleware::LoopbackTransport;
    use rcpanel_types::{Command, IntentSample, Key, Speed};
    use std::time::Duration;

    struct Fixture {
        link: Arc<LoopbackTransport>,
        bus: StatusBus,
        session: Arc<ControlSession>,
    }

    fn fixture(modality: Modality) -> Fixture {
        let bus = StatusBus::default();
        let link = Arc::new(LoopbackTransport::new());
        let topic = CommandTopic::for_device("robotcar_umk1");
        let speed = Arc::new(SpeedControl::new(Speed::default(), topic.clone(), link.clone(), bus.clone()));
        let session = Arc::new(ControlSession::new(
            modality,
            DebouncePolicy::for_modality(modality),
            topic,
            link.clone(),
            speed,
            bus.clone(),
        ));
        Fixture { link, bus, session }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn audio_session_debounces_samples() {
        let f = fixture(Modality::Audio);
        let t0 = Instant::now();
        let mut source = ScriptedSource::new(
            Modality::Audio,
            [
                Intent::Sample(IntentSample::new("F", 0.9, t0)),
                Intent::Sample(IntentSample::new("F", 0.95, t0 + ms(200))),
                Intent::Sample(IntentSample::new("B", 0.5, t0 + ms(300))),
                Intent::Sample(IntentSample::new("F", 0.8, t0 + ms(1200))),
                Intent::Sample(IntentSample::new("B", 0.9, t0 + ms(1300))),
            ],
        );
        let (_tx, rx) = watch::channel(false);
        let summary = f.session.run(&mut source, rx).await;

        assert_eq!(summary, SessionSummary { intents: 5, transmitted: 3 });
        assert_eq!(f.link.payloads(), ["F", "F", "B"]);
        assert_eq!(f.session.state().last_command(), Some(Command::Backward));
    }

    #[tokio::test]
    async fn keyboard_session_with_speed_and_focus_loss() {
        let f = fixture(Modality::Keyboard);
        let t0 = Instant::now();
        let mut source = ScriptedSource::new(
            Modality::Keyboard,
            [
                Intent::KeyEdge { key: Key::Up, pressed: true, at: t0 },
                Intent::AdjustSpeed(2),
                Intent::KeyEdge { key: Key::Right, pressed: true, at: t0 + ms(20) },
                Intent::FocusLost { at: t0 + ms(40) },
            ],
        );
        let (_tx, rx) = watch::channel(false);
        let summary = f.session.run(&mut source, rx).await;

        assert_eq!(summary.transmitted, 2);
        assert_eq!(f.link.payloads(), ["F", "speed:70", "S"]);
    }

    #[tokio::test]
    async fn disconnected_session_drops_everything() {
        let f = fixture(Modality::Image);
        f.link.set_connected(false);
        let decision = f.session.dispatch(Intent::Sample(IntentSample::new("F", 0.99, Instant::now())));
        assert_eq!(decision, Some(Decision::Suppressed(Suppression::Disconnected)));
        assert_eq!(f.session.state(), DebounceState::default());

        f.link.set_connected(true);
        let decision = f.session.dispatch(Intent::Sample(IntentSample::new("F", 0.99, Instant::now())));
        assert_eq!(decision, Some(Decision::Transmitted(Command::Forward)));
    }

    #[tokio::test]
    async fn transmissions_are_reported_on_the_bus() -> Result<(), Box<dyn std::error::Error>> {
        let f = fixture(Modality::Pose);
        let mut rx = f.bus.subscribe();
        f.session.dispatch(Intent::Sample(IntentSample::new("l", 0.4, Instant::now())));

        assert_eq!(
            rx.recv().await.ok_or("detected")?.kind,
            StatusKind::Detected { label: "L".into(), confidence: 0.4 }
        );
        assert_eq!(rx.recv().await.ok_or("sent")?.kind, StatusKind::CommandSent(Command::Left));
        Ok(())
    }

    #[test]
    fn stop_vehicle_sends_stop() {
        let f = fixture(Modality::Image);
        assert_eq!(f.session.stop_vehicle(), Decision::Transmitted(Command::Stop));
        assert_eq!(f.link.payloads(), ["S"]);
    }

    /// Source that never ends; yields the same label forever.
    struct Endless;

    #[async_trait]
    impl IntentSource for Endless {
        fn modality(&self) -> Modality {
            Modality::Image
        }

        async fn next_intent(&mut self) -> Option<Intent> {
            tokio::time::sleep(ms(1)).await;
            Some(Intent::Sample(IntentSample::new("R", 0.7, Instant::now())))
        }
    }

    #[tokio::test]
    async fn handle_stops_endless_source() {
        let f = fixture(Modality::Image);
        let handle = SessionHandle::spawn(f.session.clone(), Box::new(Endless));
        tokio::time::sleep(ms(20)).await;
        assert!(!handle.is_finished());

        let summary = tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("session must stop");
        assert!(summary.intents > 0);
        // Only one R inside the 500 ms interval.
        assert_eq!(f.link.payloads(), ["R"]);
    }

    #[tokio::test]
    async fn handle_finishes_when_source_ends() {
        let f = fixture(Modality::Audio);
        let source = ScriptedSource::new(
            Modality::Audio,
            [Intent::Sample(IntentSample::new("S", 0.9, Instant::now()))],
        );
        let summary = SessionHandle::spawn(f.session.clone(), Box::new(source)).join().await;
        assert_eq!(summary, SessionSummary { intents: 1, transmitted: 1 });
    }
}
