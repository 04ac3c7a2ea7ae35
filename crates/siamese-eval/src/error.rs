//! Error types for siamese-eval.

use thiserror::Error;

/// Errors raised when inputs break a pairing contract or files cannot be read.
///
/// The geometric engines never fail on degenerate geometry; they only reject
/// inputs whose shapes do not line up.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;
