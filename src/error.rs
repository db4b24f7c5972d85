//! Error types for multicorr.

use thiserror::Error;

/// Errors that can occur while configuring or running a search.
#[derive(Debug, Error)]
pub enum DetectiveError {
    /// Invalid run configuration. Detected eagerly, before any computation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Dataset could not be loaded or parsed.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// An internal invariant was violated. This indicates a bound-soundness
    /// bug and aborts the run; it is never silently recovered.
    #[error("invariant violation in {stage}: {detail}")]
    Invariant {
        /// The component that detected the violation.
        stage: &'static str,
        /// Diagnostic state, e.g. the offending combination.
        detail: String,
    },
}

impl DetectiveError {
    pub(crate) fn invariant(stage: &'static str, detail: impl Into<String>) -> Self {
        DetectiveError::Invariant {
            stage,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectiveError>;
