//! `rcpanel-types` – shared vocabulary of the RC Panel workspace.
//!
//! Every input modality (keyboard, voice, image, pose) ends up speaking the
//! same tiny language defined here: a closed set of [`Command`] tokens, an
//! auxiliary [`Speed`] value, and the [`CommandTopic`] naming convention that
//! lets any modality drive the same receiving device.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Drive command understood by the receiving device.
///
/// On the wire every command is a single-letter token (see [`Command::token`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    /// Safe default. Must be reachable from every other state.
    Stop,
}

impl Command {
    /// All commands, in wire-token order.
    pub const ALL: [Command; 5] = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
    ];

    /// Single-letter wire token.
    pub fn token(self) -> &'static str {
        match self {
            Command::Forward => "F",
            Command::Backward => "B",
            Command::Left => "L",
            Command::Right => "R",
            Command::Stop => "S",
        }
    }

    /// Map a free-text classifier or operator label onto a command.
    ///
    /// The label is trimmed and compared case-insensitively. Besides the
    /// single-letter tokens, the spelled-out words are accepted so that models
    /// trained with descriptive class names work unchanged. Anything else
    /// (including the empty string) yields `None`.
    pub fn from_label(label: &str) -> Option<Command> {
        let label = label.trim().to_ascii_uppercase();
        match label.as_str() {
            "F" | "FORWARD" => Some(Command::Forward),
            "B" | "BACKWARD" | "BACK" => Some(Command::Backward),
            "L" | "LEFT" => Some(Command::Left),
            "R" | "RIGHT" => Some(Command::Right),
            "S" | "STOP" => Some(Command::Stop),
            _ => None,
        }
    }
}

impl std::str::FromStr for Command {
    type Err = RcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::from_label(s).ok_or_else(|| RcError::InvalidCommand(s.trim().to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Drive speed as an integer percentage, `0..=100`.
///
/// Transmitted independently of [`Command`] as `speed:<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Speed(u8);

impl Speed {
    pub const MAX: u8 = 100;
    /// Granularity used by step adjustments.
    pub const STEP: u8 = 5;

    pub fn new(percent: u8) -> Result<Self, RcError> {
        if percent > Self::MAX {
            return Err(RcError::InvalidSpeed(percent.into()));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Shift by `steps` multiples of [`Speed::STEP`], saturating at `0` and
    /// [`Speed::MAX`].
    pub fn stepped(self, steps: i8) -> Self {
        let raw = i16::from(self.0) + i16::from(steps) * i16::from(Self::STEP);
        Self(raw.clamp(0, i16::from(Self::MAX)) as u8)
    }

    /// Wire payload, e.g. `speed:60`.
    pub fn payload(self) -> String {
        format!("speed:{}", self.0)
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self(60)
    }
}

impl TryFrom<u8> for Speed {
    type Error = RcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Speed::new(value)
    }
}

impl TryFrom<i64> for Speed {
    type Error = RcError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| RcError::InvalidSpeed(value))
            .and_then(Speed::new)
    }
}

impl From<Speed> for u8 {
    fn from(value: Speed) -> Self {
        value.0
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Input modality feeding a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Keyboard,
    Audio,
    Image,
    Pose,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modality::Keyboard => "keyboard",
            Modality::Audio => "audio",
            Modality::Image => "image",
            Modality::Pose => "pose",
        };
        f.write_str(name)
    }
}

/// Physical or on-screen key tracked by the keyboard modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Space,
}

impl Key {
    /// Keys ordered from highest to lowest priority.
    pub const PRIORITY: [Key; 5] = [Key::Space, Key::Up, Key::Down, Key::Left, Key::Right];

    /// Command issued while this key is the highest-priority held key.
    pub fn command(self) -> Command {
        match self {
            Key::Up => Command::Forward,
            Key::Down => Command::Backward,
            Key::Left => Command::Left,
            Key::Right => Command::Right,
            Key::Space => Command::Stop,
        }
    }
}

/// A classified observation from an input source.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentSample {
    pub label: String,
    /// Probability in `[0, 1]`; `1.0` for discrete input.
    pub confidence: f32,
    pub at: Instant,
}

impl IntentSample {
    pub fn new(label: impl Into<String>, confidence: f32, at: Instant) -> Self {
        Self {
            label: label.into(),
            confidence,
            at,
        }
    }
}

/// MQTT topic that carries commands for one device: `rc/<device_id>/cmd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic(String);

impl CommandTopic {
    pub fn for_device(device_id: &str) -> Self {
        Self(format!("rc/{}/cmd", device_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable status indicator, broadcast on the status bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: StatusKind,
}

impl StatusEvent {
    pub fn now(kind: StatusKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail")]
pub enum StatusKind {
    Connecting { url: String },
    Connected,
    Reconnecting,
    Disconnected,
    TransportError(String),
    ClassifierLoading(Modality),
    ClassifierLoaded(Modality),
    ClassifierFailed { modality: Modality, reason: String },
    SessionRunning(Modality),
    SessionStopped(Modality),
    /// Top prediction of the latest inference, sent or not.
    Detected { label: String, confidence: f32 },
    CommandSent(Command),
    SpeedSent(Speed),
}

/// Publish-capable connection to the broker.
///
/// The debouncer depends on nothing else: it never manages the connection
/// lifecycle, it only asks whether the link is currently up.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish of a plain-text payload, at-most-once.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), RcError>;
}

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum RcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Classifier setup failed: {0}")]
    ClassifierLoad(String),

    #[error("Classifier prediction failed: {0}")]
    ClassifierFailed(String),

    #[error("Speed {0} is outside 0..=100")]
    InvalidSpeed(i64),

    #[error("Unknown command token: {0:?}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_single_letters() {
        let tokens: Vec<_> = Command::ALL.iter().map(|c| c.token()).collect();
        assert_eq!(tokens, ["F", "B", "L", "R", "S"]);
    }

    #[test]
    fn parse_rejects_unknown_tokens() {
        assert_eq!("stop".parse::<Command>().ok(), Some(Command::Stop));
        assert!(matches!("_background_noise_".parse::<Command>(), Err(RcError::InvalidCommand(t)) if t == "_background_noise_"));
    }

    #[test]
    fn from_label_trims_and_ignores_case() {
        assert_eq!(Command::from_label("  f "), Some(Command::Forward));
        assert_eq!(Command::from_label("Backward"), Some(Command::Backward));
        assert_eq!(Command::from_label("back"), Some(Command::Backward));
        assert_eq!(Command::from_label("STOP"), Some(Command::Stop));
    }

    #[test]
    fn from_label_rejects_unknown_and_empty() {
        assert_eq!(Command::from_label(""), None);
        assert_eq!(Command::from_label("   "), None);
        assert_eq!(Command::from_label("_background_noise_"), None);
    }

    #[test]
    fn every_token_parses_back() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_label(cmd.token()), Some(cmd));
        }
    }

    #[test]
    fn speed_rejects_out_of_range() {
        assert!(Speed::new(100).is_ok());
        assert!(matches!(Speed::new(101), Err(RcError::InvalidSpeed(101))));
        assert!(matches!(Speed::try_from(-5_i64), Err(RcError::InvalidSpeed(-5))));
        assert!(matches!(Speed::try_from(300_i64), Err(RcError::InvalidSpeed(300))));
        assert_eq!(Speed::try_from(35_i64).map(Speed::percent).ok(), Some(35));
    }

    #[test]
    fn speed_steps_saturate() {
        let s = Speed::new(95).unwrap();
        assert_eq!(s.stepped(1).percent(), 100);
        assert_eq!(s.stepped(3).percent(), 100);
        assert_eq!(Speed::new(5).unwrap().stepped(-2).percent(), 0);
        assert_eq!(Speed::default().stepped(-1).percent(), 55);
    }

    #[test]
    fn speed_payload_format() {
        assert_eq!(Speed::default().payload(), "speed:60");
        assert_eq!(Speed::new(0).unwrap().payload(), "speed:0");
    }

    #[test]
    fn speed_deserialization_validates() {
        let ok: Speed = serde_json::from_str("40").unwrap();
        assert_eq!(ok.percent(), 40);
        assert!(serde_json::from_str::<Speed>("140").is_err());
    }

    #[test]
    fn topic_follows_convention() {
        let topic = CommandTopic::for_device("robotcar_umk1");
        assert_eq!(topic.as_str(), "rc/robotcar_umk1/cmd");
    }

    #[test]
    fn key_priority_starts_with_space() {
        assert_eq!(Key::PRIORITY[0], Key::Space);
        assert_eq!(Key::Space.command(), Command::Stop);
        assert_eq!(Key::Up.command(), Command::Forward);
    }

    #[test]
    fn status_event_serializes_with_tag() {
        let ev = StatusEvent::now(StatusKind::CommandSent(Command::Left));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("CommandSent"));
        assert!(json.contains("Left"));
    }

    #[test]
    fn error_display() {
        let err = RcError::ClassifierLoad("missing model.json".into());
        assert!(err.to_string().contains("missing model.json"));
        assert!(RcError::InvalidSpeed(300).to_string().contains("300"));
    }
}
