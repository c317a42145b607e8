use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Emotion scores keyed by the category names the classifier reports (0–100).
///
/// The category set belongs to the model; nothing in the aggregation path
/// enumerates it.
pub type EmotionScores = BTreeMap<String, f64>;

/// Per-category statistics over a session, keyed by category name.
pub type EmotionSummary = BTreeMap<String, EmotionStats>;

/// Pixel-space rectangle around a detected face, always inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Clip a model-space rectangle to `frame_width × frame_height`.
    ///
    /// Returns `None` when no pixel of the rectangle lies inside the frame.
    pub fn clipped(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let x1 = x.max(0.0).round() as i64;
        let y1 = y.max(0.0).round() as i64;
        let x2 = ((x + width).round() as i64).min(frame_width as i64);
        let y2 = ((y + height).round() as i64).min(frame_height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One analysed frame: scores per category, the winning category, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    pub emotions: EmotionScores,
    pub dominant: String,
    pub timestamp: DateTime<Utc>,
}

impl EmotionSample {
    /// Build a sample, picking the highest score as dominant.
    ///
    /// Non-finite scores are dropped and the rest clamped to 0–100. Returns
    /// `None` when no usable score remains.
    pub fn from_scores(emotions: EmotionScores, timestamp: DateTime<Utc>) -> Option<Self> {
        let emotions: EmotionScores = emotions
            .into_iter()
            .filter(|(_, score)| score.is_finite())
            .map(|(name, score)| (name, score.clamp(0.0, 100.0)))
            .collect();
        let dominant = emotions
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, _)| name.clone())?;

        Some(Self {
            emotions,
            dominant,
            timestamp,
        })
    }
}

/// Mean / max / min of one category, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionStats {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
}
