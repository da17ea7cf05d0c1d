//! `rcpanel-runtime` – control sessions.
//!
//! Wires an input modality to the debouncer and the transport, and keeps it
//! running until told to stop.
//!
//! # Modules
//!
//! - [`intent_source`] – [`IntentSource`][intent_source::IntentSource]: the
//!   single polymorphic capability behind every modality (keyboard, audio,
//!   image, pose), yielding [`Intent`][intent_source::Intent]s.
//! - [`classifier`] – [`Classifier`][classifier::Classifier]: the external
//!   model capability, [`ClassifierSource`][classifier::ClassifierSource]
//!   which turns its top prediction into intent samples, and
//!   [`ReplayClassifier`][classifier::ReplayClassifier] which replays recorded
//!   predictions from a JSON-lines file.
//! - [`session`] – [`ControlSession`][session::ControlSession] owns the
//!   session's debouncer; [`SessionHandle`][session::SessionHandle] is the
//!   cancellable task driving it.
//! - [`speed`] – [`SpeedControl`][speed::SpeedControl]: the auxiliary speed
//!   parameter, re-sent on every reconnect.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod classifier;
pub mod intent_source;
pub mod session;
pub mod speed;
pub mod telemetry;

pub use classifier::{Classifier, ClassifierSource, Prediction, ReplayClassifier};
pub use intent_source::{Intent, IntentSource, ScriptedSource};
pub use session::{ControlSession, SessionHandle, SessionSummary};
pub use speed::SpeedControl;
pub use telemetry::{TracerProviderGuard, init_tracing};
