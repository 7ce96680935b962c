//! AKT (Adaptive Knowledge Tracing) engine.
//!
//! Per-interaction pipeline: parameter store -> context adjuster -> BKT
//! update -> ensemble gate (with optional sequence predictor) -> HLR
//! review scheduler, with the updated mastery persisted back.

pub mod bkt;
pub mod calibration;
pub mod config;
pub mod context;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod scheduler;
pub mod sequence;
pub mod store;
pub mod types;
