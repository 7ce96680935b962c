//! Two-state Bayesian Knowledge Tracing update.
//!
//! Hidden mastery probability m, observed correctness o:
//! - predict: P(correct) = m(1-slip) + (1-m)guess
//! - posterior: Bayes update of m given o
//! - learn:    m' = post + (1 - post) * learn_rate
//!
//! Pure and deterministic; m is clamped into [ε, 1-ε] before the Bayes
//! step so the denominators never reach zero.

use serde::{Deserialize, Serialize};

use crate::akt::types::{BktParams, BktState};

pub const EPSILON: f64 = 1e-6;

/// Result of one observation: the successor state plus the intermediate
/// quantities callers report for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BktUpdate {
    pub state: BktState,
    /// P(correct) under the prior mastery, i.e. before the observation
    /// was applied. This is the externally reported next-correct
    /// probability.
    pub p_correct_before: f64,
    /// P(mastered | observation), before the learning step.
    pub posterior: f64,
}

pub fn predict_correct(mastery: f64, params: &BktParams) -> f64 {
    let m = mastery.clamp(0.0, 1.0);
    let p = m * (1.0 - params.slip_rate) + (1.0 - m) * params.guess_rate;
    p.clamp(0.0, 1.0)
}

pub fn posterior(mastery: f64, params: &BktParams, is_correct: bool) -> f64 {
    let m = mastery.clamp(EPSILON, 1.0 - EPSILON);
    let post = if is_correct {
        let evidence = m * (1.0 - params.slip_rate);
        evidence / (evidence + (1.0 - m) * params.guess_rate)
    } else {
        let evidence = m * params.slip_rate;
        evidence / (evidence + (1.0 - m) * (1.0 - params.guess_rate))
    };
    post.clamp(0.0, 1.0)
}

/// Applies one observation and returns the successor state. Practice
/// count advances by exactly 1 regardless of correctness; with
/// learn_rate = 0 this reduces to pure Bayesian filtering.
pub fn update(state: &BktState, params: &BktParams, is_correct: bool) -> BktUpdate {
    let p_correct_before = predict_correct(state.mastery_probability, params);
    let post = posterior(state.mastery_probability, params, is_correct);
    let learned = post + (1.0 - post) * params.learn_rate;

    BktUpdate {
        state: BktState {
            mastery_probability: learned.clamp(0.0, 1.0),
            practice_count: state.practice_count.saturating_add(1),
        },
        p_correct_before,
        posterior: post,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(learn: f64, slip: f64, guess: f64) -> BktParams {
        BktParams {
            learn_rate: learn,
            slip_rate: slip,
            guess_rate: guess,
        }
    }

    fn state(mastery: f64) -> BktState {
        BktState {
            mastery_probability: mastery,
            practice_count: 0,
        }
    }

    #[test]
    fn test_predict_blends_slip_and_guess() {
        let p = params(0.3, 0.1, 0.2);
        assert!((predict_correct(0.5, &p) - 0.55).abs() < 1e-12);
        assert!((predict_correct(1.0, &p) - 0.9).abs() < 1e-12);
        assert!((predict_correct(0.0, &p) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_correct_observation_raises_mastery() {
        let p = params(0.3, 0.1, 0.2);
        let result = update(&state(0.5), &p, true);
        assert!(
            result.state.mastery_probability > 0.5,
            "correct answer should raise mastery, got {}",
            result.state.mastery_probability
        );
    }

    #[test]
    fn test_incorrect_observation_lowers_high_mastery() {
        // Small learn rate relative to slip: the posterior drop dominates.
        let p = params(0.05, 0.1, 0.2);
        let result = update(&state(0.7), &p, false);
        assert!(
            result.state.mastery_probability < 0.7,
            "incorrect answer should lower mastery, got {}",
            result.state.mastery_probability
        );
    }

    #[test]
    fn test_reference_trajectory() {
        // posterior = 0.5*0.9 / (0.5*0.9 + 0.5*0.2) = 0.8182
        // learned   = 0.8182 + (1 - 0.8182) * 0.25   = 0.8636
        let p = params(0.25, 0.10, 0.20);
        let result = update(&state(0.5), &p, true);
        assert!((result.posterior - 0.8182).abs() < 1e-3);
        assert!((result.state.mastery_probability - 0.8636).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_priors_do_not_divide_by_zero() {
        let p = params(0.3, 0.1, 0.2);
        for m in [0.0, 1.0] {
            for correct in [true, false] {
                let result = update(&state(m), &p, correct);
                assert!(result.state.mastery_probability.is_finite());
                assert!((0.0..=1.0).contains(&result.state.mastery_probability));
            }
        }
    }

    #[test]
    fn test_zero_learn_rate_is_pure_filtering() {
        let p = params(0.0, 0.1, 0.2);
        let result = update(&state(0.5), &p, true);
        assert!((result.state.mastery_probability - result.posterior).abs() < 1e-12);
    }

    #[test]
    fn test_practice_count_increments_once() {
        let p = params(0.3, 0.1, 0.2);
        let first = update(&state(0.5), &p, true);
        assert_eq!(first.state.practice_count, 1);
        let second = update(&first.state, &p, false);
        assert_eq!(second.state.practice_count, 2);
    }
}
