//! Rule-based ensemble of BKT and the sequence predictor.
//!
//! Bounded, interpretable weighting: the sequence model earns weight with
//! history length up to a cap, loses some back to BKT when BKT is known
//! to be well calibrated, and is bypassed entirely (gate closed) on short
//! or high-uncertainty histories. Weights always renormalize to 1.

use serde::{Deserialize, Serialize};

use crate::akt::bkt;
use crate::akt::config::EnsembleConfig;
use crate::akt::sequence::SequencePredictor;
use crate::akt::types::{BktParams, Interaction};

const SAKT_BASE_WEIGHT: f64 = 0.35;
const SAKT_WEIGHT_PER_INTERACTION: f64 = 0.01;
const SAKT_HISTORY_CEILING: usize = 100;
const GOOD_CALIBRATION_THRESHOLD: f64 = 0.08;
const CALIBRATION_PULLBACK: f64 = 0.10;

/// Everything downstream observability needs about one blend decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleOutcome {
    pub p_bkt: f64,
    pub p_sakt: f64,
    pub p_ensemble: f64,
    pub weight_bkt: f64,
    pub weight_sakt: f64,
    pub gate_open: bool,
}

impl EnsembleOutcome {
    /// The degraded-mode result: pure BKT, all weight on it.
    pub fn bkt_only(p_bkt: f64) -> Self {
        Self {
            p_bkt,
            p_sakt: p_bkt,
            p_ensemble: p_bkt,
            weight_bkt: 1.0,
            weight_sakt: 0.0,
            gate_open: false,
        }
    }
}

pub struct EnsembleGate {
    config: EnsembleConfig,
}

impl EnsembleGate {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    pub fn blend(
        &self,
        predictor: &dyn SequencePredictor,
        mastery: f64,
        params: &BktParams,
        sequence: &[Interaction],
        uncertainty: f64,
        bkt_calibration_error: Option<f64>,
    ) -> EnsembleOutcome {
        let p_bkt = bkt::predict_correct(mastery, params);

        let gate_open = predictor.is_available()
            && sequence.len() >= self.config.min_seq_for_sakt
            && uncertainty <= self.config.max_uncertainty_for_sakt;

        if !gate_open {
            tracing::debug!(
                seq_len = sequence.len(),
                uncertainty,
                available = predictor.is_available(),
                "ensemble gate closed, running BKT-only"
            );
            return EnsembleOutcome::bkt_only(p_bkt);
        }

        let p_sakt = match predictor.predict(sequence) {
            Some(p) => p.clamp(0.0, 1.0),
            // Advertised availability but no score: same fallback as a
            // closed gate.
            None => return EnsembleOutcome::bkt_only(p_bkt),
        };

        let history = sequence.len().min(SAKT_HISTORY_CEILING);
        let mut weight_sakt = (SAKT_BASE_WEIGHT + SAKT_WEIGHT_PER_INTERACTION * history as f64)
            .min(self.config.sakt_weight_cap);

        if self.config.calibrate_to_bkt {
            if let Some(err) = bkt_calibration_error {
                if err < GOOD_CALIBRATION_THRESHOLD {
                    weight_sakt = (weight_sakt - CALIBRATION_PULLBACK).max(SAKT_BASE_WEIGHT);
                }
            }
        }

        let mut weight_bkt = (1.0 - weight_sakt).max(self.config.bkt_weight_floor);
        let total = weight_bkt + weight_sakt;
        weight_bkt /= total;
        weight_sakt /= total;

        EnsembleOutcome {
            p_bkt,
            p_sakt,
            p_ensemble: weight_bkt * p_bkt + weight_sakt * p_sakt,
            weight_bkt,
            weight_sakt,
            gate_open: true,
        }
    }
}
