//! Error types shared by the dlctl crates

use thiserror::Error;

/// Result type alias for dlctl operations
pub type Result<T> = std::result::Result<T, DlctlError>;

/// Main error type for the common crate
#[derive(Error, Debug)]
pub enum DlctlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid file status: {0}")]
    InvalidStatus(String),

    #[error("Invalid parameter mode: {0}")]
    InvalidParamsMode(String),
}
