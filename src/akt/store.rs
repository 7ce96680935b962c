use std::collections::{HashMap, VecDeque};
use std::future::Future;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::akt::types::{BktParams, BktState, QuestionMetadata, UpdateLogEntry};

/// Collaborator-side failure. "Not found" is not an error anywhere in
/// this contract: reads return defaults instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator for baseline parameters, per-(student,
/// concept) state, question metadata, and the update audit log.
///
/// Implementations own the serialization of concurrent read-modify-write
/// cycles on the same (student, concept) key; the engine assumes at most
/// one update is in flight per key.
pub trait ParameterStore: Send + Sync {
    fn get_parameters(
        &self,
        concept_id: &str,
    ) -> impl Future<Output = Result<BktParams, StoreError>> + Send;

    fn get_state(
        &self,
        student_id: &str,
        concept_id: &str,
    ) -> impl Future<Output = Result<BktState, StoreError>> + Send;

    fn save_state(
        &self,
        student_id: &str,
        concept_id: &str,
        state: &BktState,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn log_update(
        &self,
        entry: UpdateLogEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_question_metadata(
        &self,
        question_id: &str,
    ) -> impl Future<Output = Result<Option<QuestionMetadata>, StoreError>> + Send;
}

const MAX_LOG_ENTRIES: usize = 10_000;

/// Reference implementation backed by in-process maps. Useful for tests
/// and single-node embedding; the write lock on `states` is what
/// serializes same-key updates here.
#[derive(Default)]
pub struct InMemoryParameterStore {
    params: RwLock<HashMap<String, BktParams>>,
    states: RwLock<HashMap<(String, String), BktState>>,
    metadata: RwLock<HashMap<String, QuestionMetadata>>,
    log: RwLock<VecDeque<UpdateLogEntry>>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_parameters(&self, concept_id: &str, params: BktParams) {
        self.params
            .write()
            .await
            .insert(concept_id.to_string(), params);
    }

    pub async fn set_question_metadata(&self, metadata: QuestionMetadata) {
        self.metadata
            .write()
            .await
            .insert(metadata.question_id.clone(), metadata);
    }

    pub async fn update_log(&self) -> Vec<UpdateLogEntry> {
        self.log.read().await.iter().cloned().collect()
    }
}

impl ParameterStore for InMemoryParameterStore {
    async fn get_parameters(&self, concept_id: &str) -> Result<BktParams, StoreError> {
        Ok(self
            .params
            .read()
            .await
            .get(concept_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_state(&self, student_id: &str, concept_id: &str) -> Result<BktState, StoreError> {
        Ok(self
            .states
            .read()
            .await
            .get(&(student_id.to_string(), concept_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_state(
        &self,
        student_id: &str,
        concept_id: &str,
        state: &BktState,
    ) -> Result<(), StoreError> {
        self.states
            .write()
            .await
            .insert((student_id.to_string(), concept_id.to_string()), state.clone());
        Ok(())
    }

    async fn log_update(&self, entry: UpdateLogEntry) -> Result<(), StoreError> {
        let mut log = self.log.write().await;
        log.push_back(entry);
        while log.len() > MAX_LOG_ENTRIES {
            log.pop_front();
        }
        Ok(())
    }

    async fn get_question_metadata(
        &self,
        question_id: &str,
    ) -> Result<Option<QuestionMetadata>, StoreError> {
        Ok(self.metadata.read().await.get(question_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_keys_return_defaults() {
        let store = InMemoryParameterStore::new();

        let params = store.get_parameters("unknown").await.unwrap();
        assert_eq!(params, BktParams::default());

        let state = store.get_state("s1", "unknown").await.unwrap();
        assert!((state.mastery_probability - 0.5).abs() < 1e-12);
        assert_eq!(state.practice_count, 0);

        assert!(store.get_question_metadata("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let store = InMemoryParameterStore::new();
        let state = BktState {
            mastery_probability: 0.73,
            practice_count: 4,
        };
        store.save_state("s1", "c1", &state).await.unwrap();
        assert_eq!(store.get_state("s1", "c1").await.unwrap(), state);

        // Other keys stay untouched.
        assert_eq!(store.get_state("s1", "c2").await.unwrap(), BktState::default());
    }

    #[tokio::test]
    async fn test_log_is_bounded() {
        let store = InMemoryParameterStore::new();
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            store
                .log_update(UpdateLogEntry {
                    student_id: "s1".to_string(),
                    concept_id: format!("c{i}"),
                    previous_mastery: 0.5,
                    new_mastery: 0.6,
                    is_correct: true,
                    response_time_ms: None,
                    params_used: serde_json::Value::Null,
                    timestamp_ms: i as i64,
                })
                .await
                .unwrap();
        }
        let log = store.update_log().await;
        assert_eq!(log.len(), MAX_LOG_ENTRIES);
        assert_eq!(log[0].concept_id, "c5");
    }
}
