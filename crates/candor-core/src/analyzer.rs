//! Capability traits for the external models, plus the ONNX-backed analyzer.
//!
//! The sampling loop and the daemon only talk to [`FaceLocator`] and
//! [`EmotionScorer`]; tests drive them with deterministic fakes.

use crate::classifier::{ClassifierError, EmotionClassifier, CLASSIFIER_INPUT_SIZE};
use crate::crop::crop_face;
use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::types::{EmotionSample, FaceBox};
use chrono::Utc;
use std::path::Path;
use thiserror::Error;

/// Faces smaller than this (either side, in pixels) are not scored.
const MIN_FACE_SIDE: u32 = 16;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("emotion classification failed: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Locates faces in a frame.
///
/// `Ok(vec![])` means the model ran and found nothing; `Err` means the model
/// itself failed.
pub trait FaceLocator: Send {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, AnalysisError>;
}

/// Scores the emotions visible in a frame.
///
/// `Ok(None)` is the ordinary "nothing to analyse here" outcome (no face,
/// face too small) and callers skip the frame. `Err` is a model failure.
pub trait EmotionScorer: Send {
    fn score(&mut self, frame: &Frame) -> Result<Option<EmotionSample>, AnalysisError>;

    /// Score a face the caller has already located in `frame`.
    ///
    /// Implementations that detect internally should override this so a
    /// located frame is not run through detection twice.
    fn score_face(&mut self, frame: &Frame, _face: &FaceBox) -> Result<Option<EmotionSample>, AnalysisError> {
        self.score(frame)
    }
}

/// Both capabilities on one object, as the engine and stream runner use them.
pub trait Analyzer: FaceLocator + EmotionScorer {}

impl<T: FaceLocator + EmotionScorer> Analyzer for T {}

/// SCRFD detection + FER+ classification of the most confident face.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    classifier: EmotionClassifier,
}

impl OnnxAnalyzer {
    pub fn load(
        detector_path: &Path,
        classifier_path: &Path,
        labels: Vec<String>,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            classifier: EmotionClassifier::load(classifier_path, labels)?,
        })
    }
}

impl FaceLocator for OnnxAnalyzer {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, AnalysisError> {
        Ok(self.detector.locate(frame)?)
    }
}

impl EmotionScorer for OnnxAnalyzer {
    fn score(&mut self, frame: &Frame) -> Result<Option<EmotionSample>, AnalysisError> {
        let faces = self.detector.locate(frame)?;
        let Some(face) = faces.first() else {
            tracing::debug!(frame = frame.index(), "no face to score");
            return Ok(None);
        };
        self.score_face(frame, face)
    }

    fn score_face(&mut self, frame: &Frame, face: &FaceBox) -> Result<Option<EmotionSample>, AnalysisError> {
        if face.width < MIN_FACE_SIDE || face.height < MIN_FACE_SIDE {
            tracing::debug!(frame = frame.index(), ?face, "face too small to score");
            return Ok(None);
        }

        let crop = crop_face(frame, face, CLASSIFIER_INPUT_SIZE);
        let scores = self.classifier.classify(&crop)?;
        Ok(EmotionSample::from_scores(scores, Utc::now()))
    }
}
