//! `rcpanel-kernel` – the Command Debouncer.
//!
//! The only stateful logic between an input modality and the wire. It does
//! not classify anything and it does not own the connection; it decides,
//! sample by sample, whether a command goes out.
//!
//! # Modules
//!
//! - [`policy`] – [`DebouncePolicy`][policy::DebouncePolicy]: per-modality
//!   confidence threshold and minimum re-send interval.
//! - [`debouncer`] – [`CommandDebouncer`][debouncer::CommandDebouncer]:
//!   owns the session-scoped [`DebounceState`][debouncer::DebounceState] and
//!   implements the confidence-driven `on_intent` operation.
//! - [`keyboard`] – the discrete-input variant (`on_key_edge`,
//!   `on_focus_lost`) with key priority and the all-released STOP fail-safe.

pub mod debouncer;
pub mod keyboard;
pub mod policy;

pub use debouncer::{CommandDebouncer, DebounceState, Decision, Suppression};
pub use keyboard::HeldKeys;
pub use policy::DebouncePolicy;
