//! The intent-source capability shared by all modalities.
//!
//! Keyboard, audio, image and pose input differ only in where their signal
//! comes from. Each is an [`IntentSource`]; the session does not know which
//! one it is driving beyond the reported [`Modality`].

use std::collections::VecDeque;
use std::time::Instant;

use async_trait::async_trait;
use rcpanel_types::{IntentSample, Key, Modality};

/// One event from an input source.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Confidence-rated classification (or a direct label from an operator).
    Sample(IntentSample),
    /// Press or release of a tracked key.
    KeyEdge { key: Key, pressed: bool, at: Instant },
    /// The input surface lost focus.
    FocusLost { at: Instant },
    /// Operator nudged the speed by this many steps.
    AdjustSpeed(i8),
}

/// A producer of [`Intent`]s.
///
/// `next_intent` may suspend for as long as it likes (waiting for a key, or
/// for the next inference result). Returning `None` ends the session.
#[async_trait]
pub trait IntentSource: Send {
    fn modality(&self) -> Modality;

    async fn next_intent(&mut self) -> Option<Intent>;
}

/// Source that replays a fixed list of intents, then ends.
pub struct ScriptedSource {
    modality: Modality,
    queue: VecDeque<Intent>,
}

impl ScriptedSource {
    pub fn new(modality: Modality, intents: impl IntoIterator<Item = Intent>) -> Self {
        Self {
            modality,
            queue: intents.into_iter().collect(),
        }
    }
}

#[async_trait]
impl IntentSource for ScriptedSource {
    fn modality(&self) -> Modality {
        self.modality
    }

    async fn next_intent(&mut self) -> Option<Intent> {
        self.queue.pop_front()
    }
}
