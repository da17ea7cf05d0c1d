//! `rcpanel-middleware` – plumbing between the debouncer and the outside world.
//!
//! Routes commands to the broker and status to whoever is watching, without
//! caring which modality produced them.
//!
//! # Modules
//!
//! - [`bus`] – [`StatusBus`]: broadcast channel carrying
//!   [`StatusEvent`][rcpanel_types::StatusEvent]s (the status indicator).
//! - [`mqtt`] – [`MqttTransport`]: MQTT 3.1.1 over secure WebSockets, plus the
//!   [`MqttEventLoop`] task that keeps the `connected` flag current.
//! - [`loopback`] – [`LoopbackTransport`]: in-process transport that records
//!   every publish; used for dry runs and tests.

pub mod bus;
pub mod loopback;
pub mod mqtt;

pub use bus::{StatusBus, StatusReceiver};
pub use loopback::{LoopbackTransport, Published};
pub use mqtt::{BrokerConfig, MqttEventLoop, MqttTransport};
