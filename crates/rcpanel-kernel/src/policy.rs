//! [`DebouncePolicy`] – when a sample is allowed through.

use std::time::Duration;

use rcpanel_types::Modality;

/// Confidence threshold `τ` and minimum re-send interval `Δ`, fixed for the
/// lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebouncePolicy {
    /// Samples with a confidence strictly below this value are dropped.
    /// `None` lets every sample through.
    pub threshold: Option<f32>,
    /// An unchanged command is repeated only once this much time has passed
    /// since the last transmission.
    pub min_interval: Duration,
}

impl DebouncePolicy {
    pub fn new(threshold: Option<f32>, min_interval: Duration) -> Self {
        Self {
            threshold,
            min_interval,
        }
    }

    /// Defaults used when the configuration does not override them.
    ///
    /// | Modality | τ | Δ |
    /// |---|---|---|
    /// | Keyboard | 0.0 | 500 ms (edge-driven, not used for repeats) |
    /// | Audio | 0.75 | 1000 ms |
    /// | Image | unset | 500 ms |
    /// | Pose | unset | 500 ms |
    pub fn for_modality(modality: Modality) -> Self {
        match modality {
            Modality::Keyboard => Self::new(Some(0.0), Duration::from_millis(500)),
            Modality::Audio => Self::new(Some(0.75), Duration::from_millis(1000)),
            Modality::Image | Modality::Pose => Self::new(None, Duration::from_millis(500)),
        }
    }

    pub fn with_threshold(mut self, threshold: Option<f32>) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// `true` when `confidence` clears the threshold. NaN never does.
    pub fn admits(&self, confidence: f32) -> bool {
        match self.threshold {
            Some(t) => confidence >= t,
            None => !confidence.is_nan(),
        }
    }
}
