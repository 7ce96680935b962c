//! Context-sensitive parameter adjustment.
//!
//! Derives effective (learn, slip, guess) rates from the stored baseline
//! plus optional question metadata and affect signals. Pure; the baseline
//! is never touched. No context at all returns the baseline unchanged,
//! which is the normal path, not an error.

use crate::akt::config::AdjusterConfig;
use crate::akt::types::{AffectContext, BktParams, QuestionMetadata};

const IDENTIFIABILITY_CEILING: f64 = 0.999;

pub fn adjust_params(
    base: &BktParams,
    config: &AdjusterConfig,
    metadata: Option<&QuestionMetadata>,
    affect: Option<&AffectContext>,
) -> BktParams {
    if metadata.is_none() && affect.is_none() {
        return base.clone();
    }

    let mut slip = base.slip_rate;
    let mut guess = base.guess_rate;

    if let Some(meta) = metadata {
        // Harder items slip more; easier-than-baseline items never push
        // slip below the stored value.
        let difficulty = meta.difficulty_calibrated.max(0.0);
        slip = (slip + difficulty * config.k_difficulty).min(config.slip_cap.max(base.slip_rate));

        if let Some(level) = meta.bloom_level {
            let delta = config.bloom_deltas.delta(level);
            guess = (guess + delta).clamp(config.guess_floor, config.guess_cap);
        }
    }

    if let Some(affect) = affect {
        let affect_slip = affect.stress.clamp(0.0, 1.0) * config.stress_slip_weight
            + affect.cognitive_load.clamp(0.0, 1.0) * config.load_slip_weight
            + affect.time_pressure.clamp(0.0, 1.0) * config.pressure_slip_weight;
        slip = (slip + affect_slip).min(config.slip_cap.max(base.slip_rate));
    }

    // Joint rescale if the caps alone could not preserve identifiability
    // (possible when the stored baseline already sits near the boundary).
    if slip + guess >= IDENTIFIABILITY_CEILING {
        let scale = (IDENTIFIABILITY_CEILING - 1e-3) / (slip + guess);
        slip *= scale;
        guess *= scale;
    }

    BktParams {
        learn_rate: base.learn_rate,
        slip_rate: slip,
        guess_rate: guess,
    }
}
