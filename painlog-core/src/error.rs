//! Error types for painlog
//!
//! Parsing and policy evaluation never fail. Errors only surface at the
//! configuration and FFI boundaries.

use thiserror::Error;

/// Result type alias using painlog's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in painlog
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
