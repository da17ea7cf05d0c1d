//! Classifier capability and its adapter onto [`IntentSource`].
//!
//! The models themselves (webcam image, body pose, microphone audio) are
//! external. All this crate needs from one is an ordered list of
//! `(label, probability)` pairs per inference; only the top-ranked pair is
//! used.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rcpanel_middleware::StatusBus;
use rcpanel_types::{IntentSample, Modality, RcError, StatusKind};
use serde::{Deserialize, Serialize};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::intent_source::{Intent, IntentSource};

/// Consecutive failed inferences after which the source gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// One class score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(alias = "className")]
    pub label: String,
    pub probability: f32,
}

/// Highest-probability entry. NaN scores are skipped.
pub fn top_prediction(predictions: &[Prediction]) -> Option<&Prediction> {
    predictions
        .iter()
        .filter(|p| !p.probability.is_nan())
        .max_by(|a, b| a.probability.total_cmp(&b.probability))
}

/// An external image, pose or audio model.
#[async_trait]
pub trait Classifier: Send {
    /// Load weights and open the input device.
    async fn load(&mut self) -> Result<(), RcError>;

    /// Run one inference.
    ///
    /// `Ok(None)` means the input has ended (device closed, recording
    /// exhausted). `Err` is a single failed inference; the caller may try
    /// again.
    async fn predict(&mut self) -> Result<Option<Vec<Prediction>>, RcError>;
}

/// Turns a [`Classifier`] into an [`IntentSource`].
pub struct ClassifierSource<C> {
    classifier: C,
    modality: Modality,
    bus: StatusBus,
}

impl<C: Classifier> ClassifierSource<C> {
    /// Load the classifier, reporting progress on `bus`.
    ///
    /// A load failure is reported as [`StatusKind::ClassifierFailed`] and
    /// returned; nothing retries automatically.
    pub async fn start(mut classifier: C, modality: Modality, bus: StatusBus) -> Result<Self, RcError> {
        bus.publish(StatusKind::ClassifierLoading(modality));
        if let Err(e) = classifier.load().await {
            warn!(%modality, error = %e, "classifier failed to load");
            bus.publish(StatusKind::ClassifierFailed {
                modality,
                reason: e.to_string(),
            });
            return Err(e);
        }
        info!(%modality, "classifier loaded");
        bus.publish(StatusKind::ClassifierLoaded(modality));
        Ok(Self {
            classifier,
            modality,
            bus,
        })
    }
}

#[async_trait]
impl<C: Classifier> IntentSource for ClassifierSource<C> {
    fn modality(&self) -> Modality {
        self.modality
    }

    async fn next_intent(&mut self) -> Option<Intent> {
        let mut failures = 0;
        loop {
            match self.classifier.predict().await {
                Ok(Some(predictions)) => {
                    let at = Instant::now();
                    // An empty result is still a sample: "no intent".
                    let sample = match top_prediction(&predictions) {
                        Some(top) => IntentSample::new(top.label.trim(), top.probability, at),
                        None => IntentSample::new("", 0.0, at),
                    };
                    return Some(Intent::Sample(sample));
                }
                Ok(None) => {
                    debug!(modality = %self.modality, "classifier input ended");
                    return None;
                }
                Err(e) => {
                    failures += 1;
                    warn!(modality = %self.modality, error = %e, failures, "inference failed");
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        self.bus.publish(StatusKind::ClassifierFailed {
                            modality: self.modality,
                            reason: e.to_string(),
                        });
                        return None;
                    }
                }
            }
        }
    }
}

/// Replays recorded predictions at a fixed frame rate.
///
/// The file holds one JSON array of predictions per line:
///
/// ```text
/// [{"label":"F","probability":0.91},{"label":"S","probability":0.05}]
/// [{"className":"L","probability":0.66}]
/// ```
///
/// Blank lines and lines starting with `#` are skipped.
pub struct ReplayClassifier {
    path: PathBuf,
    frame_interval: Duration,
    looping: bool,
    frames: Vec<Vec<Prediction>>,
    cursor: usize,
    ticker: Option<Interval>,
}

impl ReplayClassifier {
    pub fn new(path: impl AsRef<Path>, frame_interval: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frame_interval,
            looping: false,
            frames: Vec::new(),
            cursor: 0,
            ticker: None,
        }
    }

    /// Start over from the first frame instead of ending.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn parse(raw: &str) -> Result<Vec<Vec<Prediction>>, RcError> {
        let mut frames = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let frame: Vec<Prediction> = serde_json::from_str(line)
                .map_err(|e| RcError::ClassifierLoad(format!("line {}: {e}", idx + 1)))?;
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[async_trait]
impl Classifier for ReplayClassifier {
    async fn load(&mut self) -> Result<(), RcError> {
        if self.frame_interval.is_zero() {
            return Err(RcError::ClassifierLoad(format!(
                "{}: frame interval must be non-zero",
                self.path.display()
            )));
        }
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RcError::ClassifierLoad(format!("{}: {e}", self.path.display())))?;
        let frames = Self::parse(&raw)?;
        if frames.is_empty() {
            return Err(RcError::ClassifierLoad(format!(
                "{}: no frames",
                self.path.display()
            )));
        }
        self.frames = frames;
        self.cursor = 0;
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn predict(&mut self) -> Result<Option<Vec<Prediction>>, RcError> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Err(RcError::ClassifierFailed("classifier not loaded".into()));
        };
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }
        ticker.tick().await;
        let frame = self.frames[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(frame))
    }
}
