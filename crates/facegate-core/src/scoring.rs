//! Weighted similarity between two feature records.
//!
//! Each term is a similarity in [0, 1]; negative correlations are clamped
//! to zero. A term that is undefined for the pair (zero variance on either
//! side) is left out together with its weight, so the final score is the
//! weighted mean of the defined terms.

use crate::types::{FeatureRecord, MatchResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("invalid score weights: {0}")]
    InvalidWeights(String),
    #[error("feature records were extracted with different layouts")]
    Incompatible,
}

/// Relative weight of each similarity term.
///
/// The default is intensity 0.4, texture 0.4, corner 0.1, center 0.1.
/// A matcher holds one weight set for its whole lifetime so that
/// confidences stay comparable across registration and recognition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Correlation of intensity histograms.
    pub intensity: f32,
    /// Cosine similarity of LBP histograms.
    pub texture: f32,
    /// Correlation of corner patches.
    pub corner: f32,
    /// Correlation of center patches.
    pub center: f32,
    /// Closeness of mean intensity.
    pub stats: f32,
    /// Ratio of detected face areas.
    pub area: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            intensity: 0.4,
            texture: 0.4,
            corner: 0.1,
            center: 0.1,
            stats: 0.0,
            area: 0.0,
        }
    }
}

impl ScoreWeights {
    fn as_array(&self) -> [(&'static str, f32); 6] {
        [
            ("intensity", self.intensity),
            ("texture", self.texture),
            ("corner", self.corner),
            ("center", self.center),
            ("stats", self.stats),
            ("area", self.area),
        ]
    }

    pub fn validate(&self) -> Result<(), ScoreError> {
        let mut sum = 0.0f32;
        for (name, w) in self.as_array() {
            if !w.is_finite() || w < 0.0 {
                return Err(ScoreError::InvalidWeights(format!(
                    "{name} weight must be finite and non-negative, got {w}"
                )));
            }
            sum += w;
        }
        if sum <= 0.0 {
            return Err(ScoreError::InvalidWeights("weights sum to zero".into()));
        }
        Ok(())
    }
}

/// Pearson correlation coefficient, `None` when either side has zero variance.
pub fn correlation<T: Copy + Into<f64>>(a: &[T], b: &[T]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n == 0 {
        return None;
    }

    let mean_a = a[..n].iter().map(|&v| v.into()).sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().map(|&v| v.into()).sum::<f64>() / n as f64;

    let mut cov = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let da = x.into() - mean_a;
        let db = y.into() - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some(cov / (var_a * var_b).sqrt())
}

/// Cosine similarity, `None` when either vector is all zeros.
pub fn cosine<T: Copy + Into<f64>>(a: &[T], b: &[T]) -> Option<f64> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x.into(), y.into());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b).sqrt())
}

fn unit(v: f64) -> f32 {
    v.clamp(0.0, 1.0) as f32
}

/// Compare two records under the given weights.
pub fn compare(
    a: &FeatureRecord,
    b: &FeatureRecord,
    weights: &ScoreWeights,
) -> Result<MatchResult, ScoreError> {
    if !a.is_compatible(b) {
        return Err(ScoreError::Incompatible);
    }

    let mut result = MatchResult::zero();

    if weights.intensity > 0.0 {
        result.intensity =
            correlation(&a.intensity_histogram, &b.intensity_histogram).map(unit);
    }
    if weights.texture > 0.0 {
        result.texture = cosine(&a.texture_histogram, &b.texture_histogram).map(unit);
    }
    if weights.corner > 0.0 {
        result.corner = correlation(&a.corner_patch, &b.corner_patch).map(unit);
    }
    if weights.center > 0.0 {
        result.center = correlation(&a.center_patch, &b.center_patch).map(unit);
    }
    if weights.stats > 0.0 {
        let diff = (a.mean_intensity - b.mean_intensity).abs();
        result.stats = Some(unit(1.0 - diff / 255.0));
    }
    if weights.area > 0.0 {
        let area_a = a.dimensions.0 as f64 * a.dimensions.1 as f64;
        let area_b = b.dimensions.0 as f64 * b.dimensions.1 as f64;
        let larger = area_a.max(area_b);
        if larger > 0.0 {
            result.area = Some(unit(area_a.min(area_b) / larger));
        }
    }

    let terms = [
        (weights.intensity, result.intensity),
        (weights.texture, result.texture),
        (weights.corner, result.corner),
        (weights.center, result.center),
        (weights.stats, result.stats),
        (weights.area, result.area),
    ];

    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    for (w, s) in terms {
        if let Some(s) = s {
            weighted += w * s;
            total += w;
        }
    }

    result.score = if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hist: Vec<u32>, lbp: Vec<u32>, corner: Vec<u8>, center: Vec<u8>) -> FeatureRecord {
        FeatureRecord {
            intensity_histogram: hist,
            texture_histogram: lbp,
            mean_intensity: 100.0,
            std_intensity: 20.0,
            corner_patch: corner,
            center_patch: center,
            dimensions: (80, 100),
            canonical_size: 100,
            digest: String::new(),
        }
    }

    fn sample() -> FeatureRecord {
        record(
            vec![1, 5, 9, 2, 0, 7],
            vec![3, 0, 4, 8, 1, 1],
            vec![10, 20, 30, 40],
            vec![90, 80, 85, 120],
        )
    }

    #[test]
    fn test_correlation_identical() {
        let a = [1u32, 2, 3, 10];
        assert_eq!(correlation(&a, &a), Some(1.0));
    }

    #[test]
    fn test_correlation_inverse() {
        let a = [1u8, 2, 3];
        let b = [3u8, 2, 1];
        assert!((correlation(&a, &b).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_zero_variance() {
        assert_eq!(correlation(&[5u8, 5, 5], &[1u8, 2, 3]), None);
        assert_eq!(correlation::<u8>(&[], &[]), None);
    }

    #[test]
    fn test_cosine_orthogonal_and_zero() {
        assert_eq!(cosine(&[1u32, 0], &[0u32, 4]), Some(0.0));
        assert_eq!(cosine(&[0u32, 0], &[0u32, 4]), None);
    }

    #[test]
    fn test_self_similarity_is_exactly_one() {
        let r = sample();
        let m = compare(&r, &r, &ScoreWeights::default()).unwrap();
        assert_eq!(m.score, 1.0);
        assert_eq!(m.intensity, Some(1.0));
        assert_eq!(m.texture, Some(1.0));
    }

    #[test]
    fn test_self_similarity_all_terms() {
        let weights = ScoreWeights {
            intensity: 0.4,
            texture: 0.2,
            corner: 0.1,
            center: 0.1,
            stats: 0.1,
            area: 0.1,
        };
        let r = sample();
        assert_eq!(compare(&r, &r, &weights).unwrap().score, 1.0);
    }

    #[test]
    fn test_negative_correlation_clamped() {
        let a = sample();
        let mut b = sample();
        b.center_patch = a.center_patch.iter().map(|v| 255 - v).collect();
        b.corner_patch = vec![40, 30, 20, 10];
        let m = compare(&a, &b, &ScoreWeights::default()).unwrap();
        assert_eq!(m.corner, Some(0.0));
        assert_eq!(m.center, Some(0.0));
        assert!((m.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_undefined_term_drops_weight() {
        let a = record(vec![1, 5, 9, 2], vec![3, 0, 4, 8], vec![7, 7, 7, 7], vec![1, 2, 3, 9]);
        let m = compare(&a, &a, &ScoreWeights::default()).unwrap();
        assert_eq!(m.corner, None);
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn test_incompatible_layouts() {
        let a = sample();
        let mut b = sample();
        b.intensity_histogram.push(0);
        assert!(matches!(
            compare(&a, &b, &ScoreWeights::default()),
            Err(ScoreError::Incompatible)
        ));
    }

    #[test]
    fn test_weights_validation() {
        assert!(ScoreWeights::default().validate().is_ok());
        let negative = ScoreWeights { texture: -0.1, ..ScoreWeights::default() };
        assert!(negative.validate().is_err());
        let nan = ScoreWeights { corner: f32::NAN, ..ScoreWeights::default() };
        assert!(nan.validate().is_err());
        let zero = ScoreWeights {
            intensity: 0.0,
            texture: 0.0,
            corner: 0.0,
            center: 0.0,
            stats: 0.0,
            area: 0.0,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_area_ratio_term() {
        let a = sample();
        let mut b = sample();
        b.dimensions = (40, 100);
        let weights = ScoreWeights {
            intensity: 0.0,
            texture: 0.0,
            corner: 0.0,
            center: 0.0,
            stats: 0.0,
            area: 1.0,
        };
        let m = compare(&a, &b, &weights).unwrap();
        assert!((m.score - 0.5).abs() < 1e-6);
    }
}
