use serde::{Deserialize, Serialize};

use crate::akt::types::BloomLevel;

/// Sensitivities for the context parameter adjuster. Policy values tuned
/// empirically; the invariants (monotone bloom table, bounded outputs)
/// are what tests pin down, not these literals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjusterConfig {
    pub k_difficulty: f64,
    pub slip_cap: f64,
    pub guess_floor: f64,
    pub guess_cap: f64,
    pub stress_slip_weight: f64,
    pub load_slip_weight: f64,
    pub pressure_slip_weight: f64,
    pub bloom_deltas: BloomDeltas,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            k_difficulty: 0.05,
            slip_cap: 0.4,
            guess_floor: 0.05,
            guess_cap: 0.4,
            stress_slip_weight: 0.05,
            load_slip_weight: 0.04,
            pressure_slip_weight: 0.03,
            bloom_deltas: BloomDeltas::default(),
        }
    }
}

/// Guess-rate delta per cognitive-taxonomy level. Recall-style items make
/// guessing harder to distinguish from knowing; creation-style items the
/// opposite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomDeltas {
    pub remember: f64,
    pub understand: f64,
    pub apply: f64,
    pub analyze: f64,
    pub evaluate: f64,
    pub create: f64,
}

impl Default for BloomDeltas {
    fn default() -> Self {
        Self {
            remember: -0.05,
            understand: -0.02,
            apply: 0.0,
            analyze: 0.03,
            evaluate: 0.06,
            create: 0.10,
        }
    }
}

impl BloomDeltas {
    pub fn delta(&self, level: BloomLevel) -> f64 {
        match level {
            BloomLevel::Remember => self.remember,
            BloomLevel::Understand => self.understand,
            BloomLevel::Apply => self.apply,
            BloomLevel::Analyze => self.analyze,
            BloomLevel::Evaluate => self.evaluate,
            BloomLevel::Create => self.create,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub min_seq_for_sakt: usize,
    pub max_uncertainty_for_sakt: f64,
    pub bkt_weight_floor: f64,
    pub sakt_weight_cap: f64,
    pub calibrate_to_bkt: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_seq_for_sakt: 10,
            max_uncertainty_for_sakt: 0.5,
            bkt_weight_floor: 0.3,
            sakt_weight_cap: 0.7,
            calibrate_to_bkt: true,
        }
    }
}

/// Half-life regression coefficients. Fixed, not learned online; keep the
/// mastery and correctness weights non-negative so the scheduler's
/// monotonicity contracts hold structurally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlrParams {
    pub base_half_life_minutes: f64,
    pub weight_mastery: f64,
    pub weight_correct: f64,
    pub weight_bias: f64,
}

impl Default for HlrParams {
    fn default() -> Self {
        Self {
            base_half_life_minutes: 60.0,
            weight_mastery: 1.0,
            weight_correct: 0.5,
            weight_bias: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub max_iterations: usize,
    pub gradient_tolerance: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub ece_bins: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            gradient_tolerance: 1e-6,
            min_temperature: 0.05,
            max_temperature: 10.0,
            ece_bins: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub ensemble_enabled: bool,
    pub sakt_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            ensemble_enabled: true,
            sakt_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AktConfig {
    pub adjuster: AdjusterConfig,
    pub ensemble: EnsembleConfig,
    pub hlr: HlrParams,
    pub calibration: CalibrationConfig,
    pub feature_flags: FeatureFlags,
    pub default_retention_target: f64,
}

impl Default for AktConfig {
    fn default() -> Self {
        Self {
            adjuster: AdjusterConfig::default(),
            ensemble: EnsembleConfig::default(),
            hlr: HlrParams::default(),
            calibration: CalibrationConfig::default(),
            feature_flags: FeatureFlags::default(),
            default_retention_target: 0.9,
        }
    }
}

impl AktConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("AKT_ENSEMBLE_ENABLED") {
            config.feature_flags.ensemble_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("AKT_SAKT_ENABLED") {
            config.feature_flags.sakt_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("AKT_MIN_SEQ_FOR_SAKT") {
            if let Ok(n) = val.parse() {
                config.ensemble.min_seq_for_sakt = n;
            }
        }
        if let Ok(val) = std::env::var("AKT_RETENTION_TARGET") {
            if let Ok(r) = val.parse::<f64>() {
                config.default_retention_target = r.clamp(0.5, 0.99);
            }
        }
        if let Ok(val) = std::env::var("AKT_BASE_HALF_LIFE_MINUTES") {
            if let Ok(h) = val.parse::<f64>() {
                config.hlr.base_half_life_minutes = h.max(1.0);
            }
        }

        config
    }
}
