//! Per-segment temperature scaling.
//!
//! One temperature scalar T per (exam, subject) segment, fitted by
//! minimizing the NLL of softmax(logits / T) against labels. The NLL is
//! convex in the inverse temperature s = 1/T, so the fit is a bounded
//! Newton iteration on s with a fixed budget. Unfitted segments apply
//! identity scaling and flag the result as uncalibrated.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::akt::config::CalibrationConfig;
use crate::akt::error::AktError;

pub const DEFAULT_EXAM_CODE: &str = "JEE_Mains";
pub const DEFAULT_SUBJECT: &str = "generic";

/// Composite segment key. Absent fields fall back to the defaults instead
/// of erroring; silence is the documented behavior for missing segment
/// context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalibrationKey {
    pub exam_code: String,
    pub subject: String,
}

impl CalibrationKey {
    pub fn new(exam_code: Option<&str>, subject: Option<&str>) -> Self {
        Self {
            exam_code: exam_code
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_EXAM_CODE)
                .to_string(),
            subject: subject
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_SUBJECT)
                .to_string(),
        }
    }
}

impl Default for CalibrationKey {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentTemperature {
    temperature: f64,
    fitted: bool,
}

impl Default for SegmentTemperature {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            fitted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibratedProbs {
    pub probabilities: Vec<Vec<f64>>,
    /// False when the segment was never fitted: probabilities came from
    /// identity scaling and carry no calibration guarantee.
    pub calibrated: bool,
}

/// Explicit registry object; construct one per process (or per test) and
/// pass it by handle. Fit and apply on the same key are serialized by the
/// registry lock.
pub struct CalibrationService {
    config: CalibrationConfig,
    segments: RwLock<HashMap<CalibrationKey, SegmentTemperature>>,
}

impl CalibrationService {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Current (temperature, fitted) for a segment, creating it lazily.
    pub fn temperature(&self, key: &CalibrationKey) -> (f64, bool) {
        let mut segments = self.segments.write();
        let segment = segments.entry(key.clone()).or_default();
        (segment.temperature, segment.fitted)
    }

    /// Fits the segment temperature from held-out logits and labels.
    /// Degenerate input (no rows, ragged rows, out-of-range or
    /// single-class labels) leaves the previous temperature in place and
    /// reports the failure.
    pub fn fit(
        &self,
        key: &CalibrationKey,
        logits: &[Vec<f64>],
        labels: &[usize],
    ) -> Result<f64, AktError> {
        validate_batch(logits, labels)?;

        let temperature = self.optimize_temperature(logits, labels)?;

        let mut segments = self.segments.write();
        let segment = segments.entry(key.clone()).or_default();
        segment.temperature = temperature;
        segment.fitted = true;

        tracing::info!(
            exam_code = %key.exam_code,
            subject = %key.subject,
            temperature,
            samples = labels.len(),
            "calibration temperature fitted"
        );
        Ok(temperature)
    }

    /// Scales logits by the segment temperature. Never fails: an unfitted
    /// segment gets identity scaling with `calibrated = false`.
    pub fn apply(&self, key: &CalibrationKey, logits: &[Vec<f64>]) -> CalibratedProbs {
        let (temperature, fitted) = self.temperature(key);
        if !fitted {
            tracing::debug!(
                exam_code = %key.exam_code,
                subject = %key.subject,
                "segment never fitted, applying identity scaling"
            );
        }

        let probabilities = logits
            .iter()
            .map(|row| softmax_scaled(row, temperature))
            .collect();

        CalibratedProbs {
            probabilities,
            calibrated: fitted,
        }
    }

    /// Newton iteration on s = 1/T. NLL(s) = sum_i [lse(s z_i) - s z_iy];
    /// gradient and curvature have closed forms, and the curvature is the
    /// per-row softmax variance of the logits, hence non-negative.
    fn optimize_temperature(&self, logits: &[Vec<f64>], labels: &[usize]) -> Result<f64, AktError> {
        let s_min = 1.0 / self.config.max_temperature;
        let s_max = 1.0 / self.config.min_temperature;
        let mut s: f64 = 1.0;
        let mut converged = false;

        for _ in 0..self.config.max_iterations {
            let mut gradient = 0.0;
            let mut curvature = 0.0;

            for (row, &label) in logits.iter().zip(labels) {
                let probs = softmax_scaled(row, 1.0 / s);
                let mean: f64 = probs.iter().zip(row).map(|(p, z)| p * z).sum();
                let second: f64 = probs.iter().zip(row).map(|(p, z)| p * z * z).sum();
                gradient += mean - row[label];
                curvature += second - mean * mean;
            }

            if !gradient.is_finite() || !curvature.is_finite() {
                return Err(AktError::FitFailure(
                    "non-finite gradient during temperature fit".to_string(),
                ));
            }
            if gradient.abs() < self.config.gradient_tolerance * labels.len() as f64 {
                converged = true;
                break;
            }
            if curvature <= f64::EPSILON {
                // Flat objective: logits carry no class signal.
                return Err(AktError::FitFailure(
                    "degenerate logits, zero curvature".to_string(),
                ));
            }

            // Clamp the Newton step so a bad curvature estimate cannot
            // jump outside the bracket.
            let step = (gradient / curvature).clamp(-2.0, 2.0);
            s = (s - step).clamp(s_min, s_max);

            if s <= s_min || s >= s_max {
                // Pinned at a bound counts as converged.
                converged = true;
                break;
            }
        }

        if !converged {
            // Gradient still moving after the budget; accept only if it
            // ended close, otherwise report.
            let final_norm = self.config.gradient_tolerance * labels.len() as f64 * 100.0;
            let mut gradient = 0.0;
            for (row, &label) in logits.iter().zip(labels) {
                let probs = softmax_scaled(row, 1.0 / s);
                let mean: f64 = probs.iter().zip(row).map(|(p, z)| p * z).sum();
                gradient += mean - row[label];
            }
            if gradient.abs() > final_norm {
                return Err(AktError::FitFailure(format!(
                    "temperature fit did not converge within {} iterations",
                    self.config.max_iterations
                )));
            }
        }

        Ok((1.0 / s).clamp(self.config.min_temperature, self.config.max_temperature))
    }

    /// Expected Calibration Error over equal-width confidence bins.
    pub fn expected_calibration_error(&self, probabilities: &[Vec<f64>], labels: &[usize]) -> f64 {
        ece(probabilities, labels, self.config.ece_bins)
    }
}

pub fn softmax_scaled(logits: &[f64], temperature: f64) -> Vec<f64> {
    let t = temperature.max(1e-6);
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| ((z - max) / t).exp()).collect();
    let total: f64 = exps.iter().sum();
    if total <= 0.0 {
        let uniform = 1.0 / logits.len().max(1) as f64;
        return vec![uniform; logits.len()];
    }
    exps.into_iter().map(|e| e / total).collect()
}

/// Weighted average gap between confidence and accuracy across `n_bins`
/// equal-width bins of the max-probability confidence.
pub fn ece(probabilities: &[Vec<f64>], labels: &[usize], n_bins: usize) -> f64 {
    if probabilities.is_empty() || n_bins == 0 {
        return 0.0;
    }

    let mut bin_confidence = vec![0.0; n_bins];
    let mut bin_accuracy = vec![0.0; n_bins];
    let mut bin_count = vec![0usize; n_bins];
    let mut total = 0usize;

    for (row, &label) in probabilities.iter().zip(labels) {
        let Some((argmax, &confidence)) = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };
        let bin = ((confidence * n_bins as f64) as usize).min(n_bins - 1);
        bin_confidence[bin] += confidence;
        bin_accuracy[bin] += if argmax == label { 1.0 } else { 0.0 };
        bin_count[bin] += 1;
        total += 1;
    }

    if total == 0 {
        return 0.0;
    }

    let mut error = 0.0;
    for bin in 0..n_bins {
        if bin_count[bin] == 0 {
            continue;
        }
        let count = bin_count[bin] as f64;
        let mean_conf = bin_confidence[bin] / count;
        let mean_acc = bin_accuracy[bin] / count;
        error += (mean_conf - mean_acc).abs() * (count / total as f64);
    }
    error
}

fn validate_batch(logits: &[Vec<f64>], labels: &[usize]) -> Result<(), AktError> {
    if logits.is_empty() {
        return Err(AktError::FitFailure("empty logit batch".to_string()));
    }
    if logits.len() != labels.len() {
        return Err(AktError::FitFailure(format!(
            "{} logit rows but {} labels",
            logits.len(),
            labels.len()
        )));
    }
    let width = logits[0].len();
    if width < 2 {
        return Err(AktError::FitFailure(
            "need at least two classes per row".to_string(),
        ));
    }
    for (i, row) in logits.iter().enumerate() {
        if row.len() != width {
            return Err(AktError::FitFailure(format!(
                "ragged logit batch: row {i} has {} entries, expected {width}",
                row.len()
            )));
        }
        if row.iter().any(|z| !z.is_finite()) {
            return Err(AktError::FitFailure(format!(
                "non-finite logit in row {i}"
            )));
        }
    }
    for &label in labels {
        if label >= width {
            return Err(AktError::FitFailure(format!(
                "label {label} out of range for {width} classes"
            )));
        }
    }
    let first = labels[0];
    if labels.iter().all(|&l| l == first) {
        return Err(AktError::FitFailure(
            "single class present, temperature unidentifiable".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CalibrationService {
        CalibrationService::new(CalibrationConfig::default())
    }

    /// Overconfident two-class batch: logits far apart but the model is
    /// right only ~60% of the time.
    fn overconfident_batch() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut logits = Vec::new();
        let mut labels = Vec::new();
        for i in 0..10 {
            logits.push(vec![4.0, -4.0]);
            labels.push(if i < 6 { 0 } else { 1 });
        }
        (logits, labels)
    }

    #[test]
    fn test_key_defaults_fill_absent_fields() {
        let key = CalibrationKey::new(None, Some("physics"));
        assert_eq!(key.exam_code, DEFAULT_EXAM_CODE);
        assert_eq!(key.subject, "physics");

        let key = CalibrationKey::new(Some(""), None);
        assert_eq!(key.exam_code, DEFAULT_EXAM_CODE);
        assert_eq!(key.subject, DEFAULT_SUBJECT);
    }

    #[test]
    fn test_unfitted_segment_applies_identity_and_flags() {
        let service = service();
        let result = service.apply(&CalibrationKey::default(), &[vec![2.0, 0.0]]);
        assert!(!result.calibrated);

        let expected = softmax_scaled(&[2.0, 0.0], 1.0);
        assert!((result.probabilities[0][0] - expected[0]).abs() < 1e-12);
    }

    #[test]
    fn test_fit_overconfident_raises_temperature() {
        let service = service();
        let key = CalibrationKey::default();
        let (logits, labels) = overconfident_batch();

        let t = service.fit(&key, &logits, &labels).expect("fit should succeed");
        assert!(t > 1.0, "overconfident logits need T > 1, got {t}");

        let result = service.apply(&key, &[vec![4.0, -4.0]]);
        assert!(result.calibrated);
        let raw = softmax_scaled(&[4.0, -4.0], 1.0);
        assert!(
            result.probabilities[0][0] < raw[0],
            "scaling should soften the top probability"
        );
    }

    #[test]
    fn test_fit_failure_preserves_previous_temperature() {
        let service = service();
        let key = CalibrationKey::default();
        let (logits, labels) = overconfident_batch();
        let fitted = service.fit(&key, &logits, &labels).unwrap();

        // Single-class batch must be rejected without touching the segment.
        let err = service.fit(&key, &[vec![1.0, 0.0], vec![1.0, 0.0]], &[0, 0]);
        assert!(matches!(err, Err(AktError::FitFailure(_))));

        let (t, still_fitted) = service.temperature(&key);
        assert!((t - fitted).abs() < 1e-12);
        assert!(still_fitted);
    }

    #[test]
    fn test_fit_rejects_degenerate_shapes() {
        let service = service();
        let key = CalibrationKey::default();

        assert!(service.fit(&key, &[], &[]).is_err());
        assert!(service
            .fit(&key, &[vec![1.0, 0.0], vec![1.0]], &[0, 1])
            .is_err());
        assert!(service.fit(&key, &[vec![1.0, 0.0]], &[0, 1]).is_err());
        assert!(service
            .fit(&key, &[vec![1.0, 0.0], vec![0.0, 1.0]], &[0, 5])
            .is_err());
    }

    #[test]
    fn test_segments_are_independent() {
        let service = service();
        let (logits, labels) = overconfident_batch();
        let physics = CalibrationKey::new(Some("JEE_Mains"), Some("physics"));
        service.fit(&physics, &logits, &labels).unwrap();

        let chemistry = CalibrationKey::new(Some("JEE_Mains"), Some("chemistry"));
        let (t, fitted) = service.temperature(&chemistry);
        assert!((t - 1.0).abs() < 1e-12);
        assert!(!fitted);
    }

    #[test]
    fn test_ece_zero_for_perfect_predictor() {
        let probabilities = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]];
        let labels = vec![0, 1, 0];
        let e = ece(&probabilities, &labels, 10);
        assert!(e < 1e-9, "perfectly sharp and correct predictor, got {e}");
    }

    #[test]
    fn test_ece_detects_overconfidence() {
        // 90% confidence, 50% accuracy: gap ~0.4.
        let probabilities: Vec<Vec<f64>> = (0..10).map(|_| vec![0.9, 0.1]).collect();
        let labels: Vec<usize> = (0..10).map(|i| if i < 5 { 0 } else { 1 }).collect();
        let e = ece(&probabilities, &labels, 10);
        assert!((e - 0.4).abs() < 1e-9, "expected ~0.4, got {e}");
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        for t in [0.1, 1.0, 5.0] {
            let probs = softmax_scaled(&[3.0, -1.0, 0.5], t);
            let sum: f64 = probs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }
}
