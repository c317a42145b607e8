//! Per-category statistics over a sequence of emotion samples.

use crate::types::{EmotionSample, EmotionStats, EmotionSummary};
use std::collections::BTreeMap;

/// Compute mean / max / min for every category present in `samples`.
///
/// Categories are the union over all samples. A sample that lacks a category
/// contributes nothing to it (it is not counted as zero). An empty slice
/// yields an empty summary.
pub fn summarize(samples: &[EmotionSample]) -> EmotionSummary {
    let mut acc: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for sample in samples {
        for (name, &score) in &sample.emotions {
            acc.entry(name.as_str()).or_default().push(score);
        }
    }

    acc.into_iter()
        .filter_map(|(name, a)| a.finish().map(|stats| (name.to_string(), stats)))
        .collect()
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: usize,
    max: f64,
    min: f64,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.max = value;
            self.min = value;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
        }
        self.sum += value;
        self.count += 1;
    }

    fn finish(self) -> Option<EmotionStats> {
        if self.count == 0 {
            return None;
        }
        Some(EmotionStats {
            mean: round2(self.sum / self.count as f64),
            max: round2(self.max),
            min: round2(self.min),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(pairs: &[(&str, f64)]) -> EmotionSample {
        EmotionSample::from_scores(
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_summary_three_samples() {
        let samples = vec![
            sample(&[("happy", 80.0), ("neutral", 20.0)]),
            sample(&[("happy", 60.0), ("neutral", 40.0)]),
            sample(&[("happy", 70.0), ("neutral", 30.0)]),
        ];
        let summary = summarize(&samples);

        assert_eq!(summary.len(), 2);
        assert_eq!(summary["happy"], EmotionStats { mean: 70.0, max: 80.0, min: 60.0 });
        assert_eq!(summary["neutral"], EmotionStats { mean: 30.0, max: 40.0, min: 20.0 });
    }

    #[test]
    fn test_summary_empty() {
        assert!(summarize(&[]).is_empty());
    }

    #[test]
    fn test_missing_category_is_not_zero() {
        let samples = vec![
            sample(&[("happy", 90.0), ("fear", 10.0)]),
            sample(&[("happy", 50.0)]),
        ];
        let summary = summarize(&samples);
        // fear only seen once: statistics over that single value
        assert_eq!(summary["fear"], EmotionStats { mean: 10.0, max: 10.0, min: 10.0 });
        assert_eq!(summary["happy"].mean, 70.0);
    }

    #[test]
    fn test_rounding_two_decimals() {
        let samples = vec![
            sample(&[("sad", 1.0 / 3.0)]),
            sample(&[("sad", 2.0 / 3.0)]),
            sample(&[("sad", 0.123456)]),
        ];
        let stats = summarize(&samples)["sad"];
        assert_eq!(stats.max, 0.67);
        assert_eq!(stats.min, 0.12);
        assert_eq!(stats.mean, 0.37);
    }

    #[test]
    fn test_summary_matches_direct_recomputation() {
        let samples: Vec<EmotionSample> = (0..25)
            .map(|i| {
                let v = (i * 37 % 100) as f64 + 0.25;
                sample(&[("a", v), ("b", 100.0 - v)])
            })
            .collect();
        let summary = summarize(&samples);

        for name in ["a", "b"] {
            let values: Vec<f64> = samples.iter().map(|s| s.emotions[name]).collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let max = values.iter().cloned().fold(f64::MIN, f64::max);
            let min = values.iter().cloned().fold(f64::MAX, f64::min);
            assert_eq!(summary[name].mean, round2(mean));
            assert_eq!(summary[name].max, round2(max));
            assert_eq!(summary[name].min, round2(min));
        }

        // idempotent
        assert_eq!(summarize(&samples), summary);
    }
}
