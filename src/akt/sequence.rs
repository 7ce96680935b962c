//! Sequence-model capability seam.
//!
//! The SAKT-style predictor is an external collaborator; the engine only
//! sees this trait. Which variant runs is decided at construction time,
//! never by probing the environment at call time.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::akt::types::Interaction;

pub trait SequencePredictor: Send + Sync {
    fn is_available(&self) -> bool;

    /// P(next response correct) from the interaction history, or None
    /// when the model cannot score this sequence. Returned values are
    /// clamped by the caller, implementations should stay in [0, 1].
    fn predict(&self, sequence: &[Interaction]) -> Option<f64>;
}

/// The graceful-degradation variant: never available, so the ensemble
/// gate stays closed and the pipeline runs BKT-only.
#[derive(Debug, Default)]
pub struct NoopPredictor;

impl SequencePredictor for NoopPredictor {
    fn is_available(&self) -> bool {
        false
    }

    fn predict(&self, _sequence: &[Interaction]) -> Option<f64> {
        None
    }
}

/// Serves precomputed probabilities in order. This is the adapter shape a
/// real SAKT serving process plugs in through (scores arrive out-of-band,
/// the engine consumes them one per call); it doubles as the test double.
pub struct ScriptedPredictor {
    outputs: Mutex<VecDeque<f64>>,
    fallback: Option<f64>,
}

impl ScriptedPredictor {
    pub fn new(outputs: Vec<f64>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
            fallback: None,
        }
    }

    /// Always returns the same probability, regardless of history.
    pub fn constant(probability: f64) -> Self {
        Self {
            outputs: Mutex::new(VecDeque::new()),
            fallback: Some(probability.clamp(0.0, 1.0)),
        }
    }
}

impl SequencePredictor for ScriptedPredictor {
    fn is_available(&self) -> bool {
        self.fallback.is_some() || !self.outputs.lock().is_empty()
    }

    fn predict(&self, _sequence: &[Interaction]) -> Option<f64> {
        if let Some(next) = self.outputs.lock().pop_front() {
            return Some(next.clamp(0.0, 1.0));
        }
        self.fallback
    }
}
