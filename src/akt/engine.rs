use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::akt::bkt;
use crate::akt::calibration::{CalibrationKey, CalibrationService};
use crate::akt::config::{AktConfig, FeatureFlags};
use crate::akt::context::adjust_params;
use crate::akt::ensemble::{EnsembleGate, EnsembleOutcome};
use crate::akt::error::AktError;
use crate::akt::scheduler::HlrScheduler;
use crate::akt::sequence::SequencePredictor;
use crate::akt::store::ParameterStore;
use crate::akt::types::{
    BktParams, BktState, CalibrationApplyRequest, CalibrationApplyResult, CalibrationFitRequest,
    CalibrationFitResult, InteractionRequest, PredictRequest, SpacingRequest, SpacingResult,
    TraceUpdateRequest, TraceUpdateResult, UpdateLogEntry,
};

/// Full per-interaction pipeline output: state update, ensemble
/// diagnostics, and the next review slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionOutcome {
    pub trace: TraceUpdateResult,
    pub ensemble: EnsembleOutcome,
    pub review: SpacingResult,
}

pub struct AktEngine<S: ParameterStore> {
    config: Arc<RwLock<AktConfig>>,
    store: Arc<S>,
    predictor: Arc<dyn SequencePredictor>,
    calibration: Arc<CalibrationService>,
}

impl<S: ParameterStore> AktEngine<S> {
    pub fn new(config: AktConfig, store: Arc<S>, predictor: Arc<dyn SequencePredictor>) -> Self {
        let calibration = Arc::new(CalibrationService::new(config.calibration.clone()));
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            predictor,
            calibration,
        }
    }

    pub fn calibration(&self) -> Arc<CalibrationService> {
        Arc::clone(&self.calibration)
    }

    pub async fn get_config(&self) -> AktConfig {
        self.config.read().await.clone()
    }

    pub async fn reload_config(&self) {
        let new_config = AktConfig::from_env();
        let mut config = self.config.write().await;
        *config = new_config;
        tracing::info!("AKT config reloaded");
    }

    pub async fn set_feature_flags(&self, flags: FeatureFlags) {
        let mut config = self.config.write().await;
        config.feature_flags = flags;
        tracing::info!("AKT feature flags updated at runtime");
    }

    /// Applies one observed response to the stored mastery state and
    /// persists the result. Read failures on the collaborator degrade to
    /// defaults; a failed write propagates so the caller can retry.
    pub async fn trace_update(
        &self,
        request: &TraceUpdateRequest,
    ) -> Result<TraceUpdateResult, AktError> {
        let config = self.config.read().await.clone();
        let (result, _, _) = self.run_trace(request, &config).await?;
        Ok(result)
    }

    /// The whole pipeline in one call: state update, ensemble blend on
    /// the updated mastery, and the next review slot.
    pub async fn process_interaction(
        &self,
        request: &InteractionRequest,
    ) -> Result<InteractionOutcome, AktError> {
        let config = self.config.read().await.clone();
        let (trace, effective, new_state) = self.run_trace(&request.trace, &config).await?;

        let ensemble = if config.feature_flags.ensemble_enabled {
            let gate = EnsembleGate::new(config.ensemble.clone());
            let predictor: &dyn SequencePredictor = if config.feature_flags.sakt_enabled {
                self.predictor.as_ref()
            } else {
                &DISABLED_PREDICTOR
            };
            gate.blend(
                predictor,
                new_state.mastery_probability,
                &effective,
                &request.sequence,
                request.uncertainty.unwrap_or(0.0),
                request.bkt_calibration_error,
            )
        } else {
            EnsembleOutcome::bkt_only(bkt::predict_correct(
                new_state.mastery_probability,
                &effective,
            ))
        };

        let scheduler = HlrScheduler::new(config.hlr.clone());
        let review = scheduler.optimal_spacing(
            new_state.mastery_probability,
            request.trace.is_correct,
            request
                .retention_target
                .unwrap_or(config.default_retention_target),
        );

        Ok(InteractionOutcome {
            trace,
            ensemble,
            review,
        })
    }

    /// Ensemble probability for the *current* stored state, without
    /// applying an observation.
    pub async fn predict(&self, request: &PredictRequest) -> Result<EnsembleOutcome, AktError> {
        let config = self.config.read().await.clone();
        let params = self.load_parameters(&request.concept_id).await;
        let state = self
            .load_state(&request.student_id, &request.concept_id)
            .await;

        if !config.feature_flags.ensemble_enabled {
            return Ok(EnsembleOutcome::bkt_only(bkt::predict_correct(
                state.mastery_probability,
                &params,
            )));
        }

        let gate = EnsembleGate::new(config.ensemble.clone());
        let predictor: &dyn SequencePredictor = if config.feature_flags.sakt_enabled {
            self.predictor.as_ref()
        } else {
            &DISABLED_PREDICTOR
        };
        Ok(gate.blend(
            predictor,
            state.mastery_probability,
            &params,
            &request.sequence,
            request.uncertainty.unwrap_or(0.0),
            request.bkt_calibration_error,
        ))
    }

    pub fn fit_calibration(
        &self,
        request: &CalibrationFitRequest,
    ) -> Result<CalibrationFitResult, AktError> {
        let key = CalibrationKey::new(request.exam_code.as_deref(), request.subject.as_deref());
        let temperature = self.calibration.fit(&key, &request.logits, &request.labels)?;
        Ok(CalibrationFitResult { temperature })
    }

    pub fn apply_calibration(&self, request: &CalibrationApplyRequest) -> CalibrationApplyResult {
        let key = CalibrationKey::new(request.exam_code.as_deref(), request.subject.as_deref());
        let scaled = self.calibration.apply(&key, &request.logits);
        CalibrationApplyResult {
            probabilities: scaled.probabilities,
            calibrated: scaled.calibrated,
        }
    }

    pub async fn review_spacing(&self, request: &SpacingRequest) -> SpacingResult {
        let config = self.config.read().await;
        let scheduler = HlrScheduler::new(config.hlr.clone());
        scheduler.optimal_spacing(
            request.mastery,
            request.last_correct,
            request
                .retention_target
                .unwrap_or(config.default_retention_target),
        )
    }

    async fn run_trace(
        &self,
        request: &TraceUpdateRequest,
        config: &AktConfig,
    ) -> Result<(TraceUpdateResult, BktParams, BktState), AktError> {
        let base_params = self.load_parameters(&request.concept_id).await;
        let state = self
            .load_state(&request.student_id, &request.concept_id)
            .await;

        let metadata = match &request.question_id {
            Some(question_id) => match self.store.get_question_metadata(question_id).await {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::warn!(error = %err, question_id = %question_id, "question metadata unavailable");
                    None
                }
            },
            None => None,
        };

        let context_applied = metadata.is_some() || request.affect.is_some();
        let effective = adjust_params(
            &base_params,
            &config.adjuster,
            metadata.as_ref(),
            request.affect.as_ref(),
        );

        let update = bkt::update(&state, &effective, request.is_correct);
        let new_state = update.state.clone();

        self.store
            .save_state(&request.student_id, &request.concept_id, &new_state)
            .await
            .map_err(|err| AktError::Upstream(err.to_string()))?;

        let entry = UpdateLogEntry {
            student_id: request.student_id.clone(),
            concept_id: request.concept_id.clone(),
            previous_mastery: state.mastery_probability,
            new_mastery: new_state.mastery_probability,
            is_correct: request.is_correct,
            response_time_ms: request.response_time_ms,
            params_used: serde_json::to_value(&effective).unwrap_or_default(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(err) = self.store.log_update(entry).await {
            tracing::warn!(error = %err, "update log write failed, continuing");
        }

        tracing::debug!(
            student_id = %request.student_id,
            concept_id = %request.concept_id,
            previous = state.mastery_probability,
            new = new_state.mastery_probability,
            correct = request.is_correct,
            "mastery updated"
        );

        let result = TraceUpdateResult {
            previous_mastery: state.mastery_probability,
            new_mastery: new_state.mastery_probability,
            confidence: trace_confidence(&new_state),
            learning_occurred: new_state.mastery_probability > state.mastery_probability,
            adjusted_params: context_applied.then(|| effective.clone()),
            p_correct_pred: Some(update.p_correct_before),
        };
        Ok((result, effective, new_state))
    }

    async fn load_parameters(&self, concept_id: &str) -> BktParams {
        match self.store.get_parameters(concept_id).await {
            Ok(params) => match params.validated() {
                Ok(()) => params,
                Err(err) => {
                    tracing::warn!(error = %err, concept_id, "stored parameters invalid, using defaults");
                    BktParams::default()
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, concept_id, "parameter read failed, using defaults");
                BktParams::default()
            }
        }
    }

    async fn load_state(&self, student_id: &str, concept_id: &str) -> BktState {
        match self.store.get_state(student_id, concept_id).await {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, student_id, concept_id, "state read failed, using defaults");
                BktState::default()
            }
        }
    }
}

/// Stand-in used when the SAKT feature flag is off: keeps the gate-closed
/// path identical to a missing predictor.
struct DisabledPredictor;

static DISABLED_PREDICTOR: DisabledPredictor = DisabledPredictor;

impl SequencePredictor for DisabledPredictor {
    fn is_available(&self) -> bool {
        false
    }

    fn predict(&self, _sequence: &[crate::akt::types::Interaction]) -> Option<f64> {
        None
    }
}

/// Confidence in the reported mastery: distance from the uninformative
/// prior, damped while the practice count is still small.
fn trace_confidence(state: &BktState) -> f64 {
    let evidence = 2.0 * (state.mastery_probability - 0.5).abs();
    let exposure = state.practice_count as f64 / (state.practice_count as f64 + 3.0);
    (evidence * exposure).clamp(0.0, 1.0)
}
