use thiserror::Error;

/// Engine-level failures. Numeric degeneracy (zero denominators in the
/// Bayes update) is recovered locally by epsilon clamping and never
/// surfaces here; an unavailable sequence predictor closes the ensemble
/// gate instead of erroring.
#[derive(Debug, Error)]
pub enum AktError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Calibration fit did not converge or received degenerate data.
    /// The segment keeps its previous temperature.
    #[error("calibration fit failed: {0}")]
    FitFailure(String),

    /// The persistence collaborator failed on a write. Reads degrade to
    /// defaults instead; a lost mastery update is worse than a rejected
    /// request, so write failures are reported for the caller to retry.
    #[error("upstream store error: {0}")]
    Upstream(String),
}
