//! Error types for the ghx-proto crate.

use thiserror::Error;

/// Errors that can occur while constructing or validating protocol values.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// A required field was missing from a submission.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field held a value outside its accepted domain.
    #[error("validation error: {0}")]
    Validation(String),
}
