use serde::{Deserialize, Serialize};

use crate::akt::error::AktError;

/// Baseline BKT parameters for one concept. The context adjuster derives a
/// request-scoped copy from these; the stored baseline is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    pub learn_rate: f64,
    pub slip_rate: f64,
    pub guess_rate: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            learn_rate: 0.3,
            slip_rate: 0.1,
            guess_rate: 0.2,
        }
    }
}

impl BktParams {
    /// Identifiability checks: slip + guess < 1 and a correct answer must
    /// be more likely under mastery than under non-mastery.
    pub fn validated(&self) -> Result<(), AktError> {
        let in_unit = |v: f64| v > 0.0 && v < 1.0;
        if !in_unit(self.learn_rate) || !in_unit(self.slip_rate) || !in_unit(self.guess_rate) {
            return Err(AktError::Configuration(format!(
                "BKT rates must lie in (0,1): learn={}, slip={}, guess={}",
                self.learn_rate, self.slip_rate, self.guess_rate
            )));
        }
        // slip + guess < 1 is the same inequality as (1 - slip) > guess:
        // one check covers both identifiability conditions.
        if self.slip_rate + self.guess_rate >= 1.0 {
            return Err(AktError::Configuration(format!(
                "slip + guess must stay below 1 for identifiability: {} + {}",
                self.slip_rate, self.guess_rate
            )));
        }
        Ok(())
    }
}

/// Per-(student, concept) tracing state. Updated exactly once per
/// interaction; callers get a new state back, nothing mutates in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BktState {
    pub mastery_probability: f64,
    pub practice_count: u32,
}

impl Default for BktState {
    fn default() -> Self {
        Self {
            mastery_probability: 0.5,
            practice_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloomLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remember => "remember",
            Self::Understand => "understand",
            Self::Apply => "apply",
            Self::Analyze => "analyze",
            Self::Evaluate => "evaluate",
            Self::Create => "create",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "remember" => Some(Self::Remember),
            "understand" => Some(Self::Understand),
            "apply" => Some(Self::Apply),
            "analyze" => Some(Self::Analyze),
            "evaluate" => Some(Self::Evaluate),
            "create" => Some(Self::Create),
            _ => None,
        }
    }
}

/// Read-only question context consumed by the parameter adjuster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionMetadata {
    pub question_id: String,
    pub difficulty_calibrated: f64,
    pub bloom_level: Option<BloomLevel>,
    pub estimated_time_seconds: Option<u32>,
    #[serde(default)]
    pub required_process_skills: Vec<String>,
}

/// Momentary affect signals, each in [0, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffectContext {
    pub stress: f64,
    pub cognitive_load: f64,
    pub time_pressure: f64,
}

/// One past response in a learner's interaction history, the unit the
/// sequence predictor consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub concept_id: String,
    pub is_correct: bool,
    pub response_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceUpdateRequest {
    pub student_id: String,
    pub concept_id: String,
    pub question_id: Option<String>,
    pub is_correct: bool,
    pub response_time_ms: Option<i64>,
    #[serde(default)]
    pub affect: Option<AffectContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceUpdateResult {
    pub previous_mastery: f64,
    pub new_mastery: f64,
    pub confidence: f64,
    pub learning_occurred: bool,
    pub adjusted_params: Option<BktParams>,
    pub p_correct_pred: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub student_id: String,
    pub concept_id: String,
    #[serde(default)]
    pub sequence: Vec<Interaction>,
    pub uncertainty: Option<f64>,
    pub bkt_calibration_error: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub trace: TraceUpdateRequest,
    #[serde(default)]
    pub sequence: Vec<Interaction>,
    pub uncertainty: Option<f64>,
    pub bkt_calibration_error: Option<f64>,
    pub retention_target: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationFitRequest {
    pub logits: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    pub exam_code: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationFitResult {
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationApplyRequest {
    pub logits: Vec<Vec<f64>>,
    pub exam_code: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationApplyResult {
    pub probabilities: Vec<Vec<f64>>,
    pub calibrated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingRequest {
    pub mastery: f64,
    pub last_correct: bool,
    pub retention_target: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingResult {
    pub half_life_minutes: f64,
    pub next_review_in_minutes: f64,
    pub retention_target: f64,
}

/// Audit record of one mastery update, handed to the store's log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub student_id: String,
    pub concept_id: String,
    pub previous_mastery: f64,
    pub new_mastery: f64,
    pub is_correct: bool,
    pub response_time_ms: Option<i64>,
    pub params_used: serde_json::Value,
    pub timestamp_ms: i64,
}
