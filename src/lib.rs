pub mod akt;
pub mod logging;

pub use akt::calibration::{CalibrationService, CalibratedProbs};
pub use akt::engine::AktEngine;
pub use akt::error::AktError;
pub use akt::sequence::{NoopPredictor, ScriptedPredictor, SequencePredictor};
pub use akt::store::{InMemoryParameterStore, ParameterStore, StoreError};
