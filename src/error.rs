//! # Error Module
//!
//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the evaluation engine's public API.
///
/// Integrity violations and wildcard-resource checks are resolved locally by
/// the evaluator and never reach this type; see [`crate::evaluator`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
