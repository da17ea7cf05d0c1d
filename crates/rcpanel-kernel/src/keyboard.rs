//! Discrete-input variant of the debouncer.
//!
//! Keyboard and on-screen buttons have no confidence and no decay, so there
//! are no heartbeats: a command goes out only when the top-priority held key
//! changes. Two fail-safes bypass that rule and always transmit STOP:
//!
//! * every Space press, and releasing the last held key;
//! * loss of input focus ([`CommandDebouncer::on_focus_lost`]).

use std::time::Instant;

use rcpanel_types::{Command, Key, Transport};

use crate::debouncer::{CommandDebouncer, Decision, Suppression};

/// Set of currently held keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldKeys {
    // Indexed by position in `Key::PRIORITY`.
    held: [bool; 5],
}

impl HeldKeys {
    fn slot(key: Key) -> usize {
        match key {
            Key::Space => 0,
            Key::Up => 1,
            Key::Down => 2,
            Key::Left => 3,
            Key::Right => 4,
        }
    }

    pub fn set(&mut self, key: Key, pressed: bool) {
        self.held[Self::slot(key)] = pressed;
    }

    pub fn is_held(&self, key: Key) -> bool {
        self.held[Self::slot(key)]
    }

    pub fn is_empty(&self) -> bool {
        !self.held.iter().any(|h| *h)
    }

    pub fn clear(&mut self) {
        self.held = [false; 5];
    }

    /// Highest-priority held key.
    pub fn top(&self) -> Option<Key> {
        Key::PRIORITY.into_iter().find(|k| self.is_held(*k))
    }
}

impl CommandDebouncer {
    /// Feed a press (`pressed == true`) or release edge.
    ///
    /// The held-key set tracks the physical device even while disconnected;
    /// the debounce state and the transport are left alone in that case.
    pub fn on_key_edge(
        &mut self,
        transport: &dyn Transport,
        key: Key,
        pressed: bool,
        now: Instant,
    ) -> Decision {
        self.held.set(key, pressed);

        if !transport.is_connected() {
            return Decision::Suppressed(Suppression::Disconnected);
        }

        if pressed && key == Key::Space {
            return self.transmit(transport, Command::Stop, now);
        }
        let Some(top) = self.held.top() else {
            return self.transmit(transport, Command::Stop, now);
        };

        let command = top.command();
        if self.state().last_command() == Some(command) {
            Decision::Suppressed(Suppression::Unchanged)
        } else {
            self.transmit(transport, command, now)
        }
    }

    /// The input surface lost focus: forget every held key and stop.
    pub fn on_focus_lost(&mut self, transport: &dyn Transport, now: Instant) -> Decision {
        self.held.clear();
        if !transport.is_connected() {
            return Decision::Suppressed(Suppression::Disconnected);
        }
        self.transmit(transport, Command::Stop, now)
    }

    pub fn held_keys(&self) -> &HeldKeys {
        &self.held
    }
}
