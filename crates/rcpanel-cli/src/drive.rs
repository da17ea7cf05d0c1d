//! Drive mode – the terminal as a keyboard [`IntentSource`].
//!
//! Arrow keys steer, Space stops, `+`/`-` change the speed, and `Esc`, `q`
//! or `Ctrl-C` leave drive mode. Leaving is reported as a focus loss, so the
//! session sends STOP on the way out.
//!
//! Terminals that support the kitty keyboard protocol report real key
//! releases. Elsewhere a key counts as released once its auto-repeat stops:
//! [`FIRST_REPEAT_WAIT`] after the initial press (covering the typematic
//! delay), then [`RELEASE_TIMEOUT`] after each repeat.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::io::{Write, stdout};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossterm::event::{
    DisableFocusChange, EnableFocusChange, Event, EventStream, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use futures_util::StreamExt;
use rcpanel_runtime::{Intent, IntentSource};
use rcpanel_types::{Key, Modality, RcError};
use tracing::{debug, warn};

/// Silence after the first press before the key counts as released.
pub const FIRST_REPEAT_WAIT: Duration = Duration::from_millis(550);
/// Silence after an auto-repeat before the key counts as released.
pub const RELEASE_TIMEOUT: Duration = Duration::from_millis(150);

/// Press bookkeeping for terminals without release events.
#[derive(Debug, Default)]
pub(crate) struct ReleaseEmulator {
    seen: HashMap<Key, (Instant, bool)>,
}

impl ReleaseEmulator {
    /// Record a press or repeat. Returns `true` for a fresh press.
    pub(crate) fn touch(&mut self, key: Key, now: Instant) -> bool {
        match self.seen.get_mut(&key) {
            Some(entry) => {
                *entry = (now, true);
                false
            }
            None => {
                self.seen.insert(key, (now, false));
                true
            }
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.seen
            .values()
            .map(|&(last, repeating)| last + if repeating { RELEASE_TIMEOUT } else { FIRST_REPEAT_WAIT })
            .min()
    }

    /// Remove and return the keys whose repeat has lapsed by `now`,
    /// lowest priority first so that the top command never changes until the
    /// last key goes.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Key> {
        let mut expired: Vec<Key> = self
            .seen
            .iter()
            .filter(|&(_, &(last, repeating))| {
                let wait = if repeating { RELEASE_TIMEOUT } else { FIRST_REPEAT_WAIT };
                now.duration_since(last) >= wait
            })
            .map(|(&key, _)| key)
            .collect();
        expired.sort_by_key(|k| Reverse(Key::PRIORITY.iter().position(|p| p == k)));
        for key in &expired {
            self.seen.remove(key);
        }
        expired
    }

    pub(crate) fn clear(&mut self) {
        self.seen.clear();
    }
}

pub(crate) fn key_for(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::Up => Some(Key::Up),
        KeyCode::Down => Some(Key::Down),
        KeyCode::Left => Some(Key::Left),
        KeyCode::Right => Some(Key::Right),
        KeyCode::Char(' ') => Some(Key::Space),
        _ => None,
    }
}

fn is_exit(event: &KeyEvent) -> bool {
    match event.code {
        KeyCode::Esc | KeyCode::Char('q') => true,
        KeyCode::Char('c') => event.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Raw-mode keyboard reader. Restores the terminal on drop.
pub struct TerminalKeyboard {
    events: EventStream,
    real_releases: bool,
    emulator: ReleaseEmulator,
    pending: VecDeque<Intent>,
    finished: bool,
}

impl TerminalKeyboard {
    /// Switch the terminal to raw mode and start reading keys.
    pub fn enter() -> Result<Self, RcError> {
        enable_raw_mode()?;
        let real_releases = supports_keyboard_enhancement().unwrap_or(false);
        let mut out = stdout();
        if real_releases {
            execute!(
                out,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }
        execute!(out, EnableFocusChange)?;
        debug!(real_releases, "drive mode entered");
        Ok(Self {
            events: EventStream::new(),
            real_releases,
            emulator: ReleaseEmulator::default(),
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// `true` when the terminal reports key releases.
    pub fn reports_releases(&self) -> bool {
        self.real_releases
    }

    fn finish(&mut self) {
        self.finished = true;
        self.emulator.clear();
        self.pending.push_back(Intent::FocusLost { at: Instant::now() });
    }

    fn translate(&mut self, event: Event) {
        let now = Instant::now();
        match event {
            Event::FocusLost => {
                self.emulator.clear();
                self.pending.push_back(Intent::FocusLost { at: now });
            }
            Event::Key(key_event) => {
                if key_event.kind != KeyEventKind::Release && is_exit(&key_event) {
                    self.finish();
                    return;
                }
                match key_event.code {
                    KeyCode::Char('+') | KeyCode::Char('=') if key_event.kind == KeyEventKind::Press => {
                        self.pending.push_back(Intent::AdjustSpeed(1));
                    }
                    KeyCode::Char('-') | KeyCode::Char('_') if key_event.kind == KeyEventKind::Press => {
                        self.pending.push_back(Intent::AdjustSpeed(-1));
                    }
                    code => {
                        if let Some(key) = key_for(code) {
                            self.key_event(key, key_event.kind, now);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn key_event(&mut self, key: Key, kind: KeyEventKind, at: Instant) {
        let pressed = match (self.real_releases, kind) {
            (true, KeyEventKind::Press) => true,
            (true, KeyEventKind::Release) => false,
            (true, KeyEventKind::Repeat) => return,
            (false, KeyEventKind::Release) => return,
            (false, _) => {
                if !self.emulator.touch(key, at) {
                    return;
                }
                true
            }
        };
        self.pending.push_back(Intent::KeyEdge { key, pressed, at });
    }
}

impl Drop for TerminalKeyboard {
    fn drop(&mut self) {
        let mut out = stdout();
        if self.real_releases {
            let _ = execute!(out, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(out, DisableFocusChange);
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
        let _ = out.flush();
    }
}

#[async_trait]
impl IntentSource for TerminalKeyboard {
    fn modality(&self) -> Modality {
        Modality::Keyboard
    }

    async fn next_intent(&mut self) -> Option<Intent> {
        loop {
            if let Some(intent) = self.pending.pop_front() {
                return Some(intent);
            }
            if self.finished {
                return None;
            }

            let next = match self.emulator.deadline() {
                Some(deadline) => tokio::select! {
                    event = self.events.next() => Some(event),
                    _ = tokio::time::sleep_until(deadline.into()) => None,
                },
                None => Some(self.events.next().await),
            };

            match next {
                None => {
                    let now = Instant::now();
                    for key in self.emulator.expire(now) {
                        self.pending.push_back(Intent::KeyEdge {
                            key,
                            pressed: false,
                            at: now,
                        });
                    }
                }
                Some(Some(Ok(event))) => self.translate(event),
                Some(Some(Err(e))) => {
                    warn!(error = %e, "terminal read failed; leaving drive mode");
                    self.finish();
                }
                Some(None) => self.finish(),
            }
        }
    }
}
