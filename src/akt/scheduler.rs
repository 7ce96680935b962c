//! Half-life regression review scheduling.
//!
//! Recall probability decays as exp(-Δt / h); the half-life h comes from
//! a log-linear model over mastery and last-outcome features:
//!
//!   h = base * exp(w_bias + w_mastery * logit(m)/2 + w_correct * c)
//!
//! with c = 1 for a correct last response and -0.5 otherwise. The optimal
//! gap solves exp(-Δt/h) = retention_target.

use crate::akt::bkt::EPSILON;
use crate::akt::config::HlrParams;
use crate::akt::types::SpacingResult;

const HALF_LIFE_MIN_MINUTES: f64 = 5.0;
const HALF_LIFE_MAX_MINUTES: f64 = 20160.0; // 14 days
const SPACING_MIN_MINUTES: f64 = 1.0;
const SPACING_MAX_MINUTES: f64 = 43200.0; // 30 days
const RETENTION_MIN: f64 = 0.50;
const RETENTION_MAX: f64 = 0.99;

pub struct HlrScheduler {
    params: HlrParams,
}

impl HlrScheduler {
    pub fn new(params: HlrParams) -> Self {
        Self { params }
    }

    pub fn estimate_half_life(&self, mastery: f64, last_correct: bool) -> f64 {
        let m = mastery.clamp(EPSILON, 1.0 - EPSILON);
        let logit = (m / (1.0 - m)).ln();
        let correctness = if last_correct { 1.0 } else { -0.5 };

        let exponent = self.params.weight_bias
            + self.params.weight_mastery * logit / 2.0
            + self.params.weight_correct * correctness;
        let half_life = self.params.base_half_life_minutes * exponent.exp();
        half_life.clamp(HALF_LIFE_MIN_MINUTES, HALF_LIFE_MAX_MINUTES)
    }

    pub fn optimal_spacing(
        &self,
        mastery: f64,
        last_correct: bool,
        retention_target: f64,
    ) -> SpacingResult {
        let retention_target = retention_target.clamp(RETENTION_MIN, RETENTION_MAX);
        let half_life = self.estimate_half_life(mastery, last_correct);
        let gap = -half_life * retention_target.ln();

        SpacingResult {
            half_life_minutes: half_life,
            next_review_in_minutes: gap.clamp(SPACING_MIN_MINUTES, SPACING_MAX_MINUTES),
            retention_target,
        }
    }
}

impl Default for HlrScheduler {
    fn default() -> Self {
        Self::new(HlrParams::default())
    }
}
