//! Facial emotion classifier via ONNX Runtime.
//!
//! Expects a FER+ style network: one 64×64 grayscale face crop in, one logit
//! per emotion category out. Category names are supplied by the caller in
//! output order, so the same code serves any model with that I/O shape.

use crate::types::EmotionScores;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Side length of the square face crop fed to the network.
pub const CLASSIFIER_INPUT_SIZE: usize = 64;

/// Output order of the ONNX model zoo `emotion-ferplus-8` network.
pub const FERPLUS_LABELS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("no emotion labels configured")]
    NoLabels,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct EmotionClassifier {
    session: Session,
    labels: Vec<String>,
}

impl EmotionClassifier {
    /// Load the classifier model; `labels` name the outputs in order.
    pub fn load(model_path: &Path, labels: Vec<String>) -> Result<Self, ClassifierError> {
        if labels.is_empty() {
            return Err(ClassifierError::NoLabels);
        }
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            categories = labels.len(),
            "loaded emotion classifier"
        );

        Ok(Self { session, labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Classify a `CLASSIFIER_INPUT_SIZE²` face crop into percentage scores.
    pub fn classify(&mut self, face: &[u8]) -> Result<EmotionScores, ClassifierError> {
        let input = preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("emotion logits: {e}")))?;

        if logits.len() != self.labels.len() {
            return Err(ClassifierError::InferenceFailed(format!(
                "model produced {} scores for {} configured labels",
                logits.len(),
                self.labels.len()
            )));
        }

        Ok(to_percentages(&self.labels, logits))
    }
}

/// FER+ takes raw 0–255 intensities, single channel.
fn preprocess(face: &[u8]) -> Array4<f32> {
    let size = CLASSIFIER_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for y in 0..size {
        for x in 0..size {
            tensor[[0, 0, y, x]] = face.get(y * size + x).copied().unwrap_or(0) as f32;
        }
    }
    tensor
}

/// Softmax the logits and scale to 0–100.
fn to_percentages(labels: &[String], logits: &[f32]) -> EmotionScores {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&l| ((l - max) as f64).exp()).collect();
    let total: f64 = exps.iter().sum();

    labels
        .iter()
        .zip(exps)
        .map(|(label, e)| {
            let pct = if total > 0.0 { e / total * 100.0 } else { 0.0 };
            (label.clone(), pct)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_percentages_sum_to_hundred() {
        let scores = to_percentages(&labels(&["a", "b", "c"]), &[2.0, 1.0, -3.0]);
        let total: f64 = scores.values().sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert!(scores["a"] > scores["b"]);
        assert!(scores["b"] > scores["c"]);
    }

    #[test]
    fn test_percentages_equal_logits() {
        let scores = to_percentages(&labels(&["x", "y"]), &[0.5, 0.5]);
        assert!((scores["x"] - 50.0).abs() < 1e-9);
        assert!((scores["y"] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentages_large_logits_stable() {
        let scores = to_percentages(&labels(&["x", "y"]), &[1000.0, 0.0]);
        assert!((scores["x"] - 100.0).abs() < 1e-9);
        assert!(scores["y"].is_finite());
    }

    #[test]
    fn test_preprocess_keeps_raw_intensity() {
        let face = vec![200u8; CLASSIFIER_INPUT_SIZE * CLASSIFIER_INPUT_SIZE];
        let tensor = preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 1, CLASSIFIER_INPUT_SIZE, CLASSIFIER_INPUT_SIZE]);
        assert_eq!(tensor[[0, 0, 10, 10]], 200.0);
    }

    #[test]
    fn test_load_rejects_empty_labels() {
        let err = EmotionClassifier::load(Path::new("/nonexistent.onnx"), Vec::new()).err();
        assert!(matches!(err, Some(ClassifierError::NoLabels)));
    }

    #[test]
    fn test_load_missing_model() {
        let err = EmotionClassifier::load(Path::new("/nonexistent/emotion.onnx"), labels(&FERPLUS_LABELS)).err();
        assert!(matches!(err, Some(ClassifierError::ModelNotFound(_))));
    }
}
