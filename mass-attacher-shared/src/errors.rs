//! Error types used across the mass-attacher crate family.

use thiserror::Error;

/// Result type for mass-attacher operations.
pub type MassAttacherResult<T> = Result<T, MassAttacherError>;

#[derive(Debug, Error)]
pub enum MassAttacherError {
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("resource limit error: {0}")]
    ResourceLimit(String),

    #[error("missing external source: {0}")]
    MissingSource(String),

    #[error("no matching functions found")]
    NoMatchingFunctions,

    #[error("program clone failed: {0}")]
    ProgramClone(String),

    #[error("phase precondition not met: {0}")]
    PhaseOrder(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for MassAttacherError {
    fn from(err: std::io::Error) -> Self {
        MassAttacherError::Internal(format!("I/O error: {}", err))
    }
}

impl From<String> for MassAttacherError {
    fn from(err: String) -> Self {
        MassAttacherError::Internal(err)
    }
}

impl From<&str> for MassAttacherError {
    fn from(err: &str) -> Self {
        MassAttacherError::Internal(err.to_string())
    }
}
