//! Error types for risk engine

use thiserror::Error;
use uuid::Uuid;

/// Risk engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Score outside 0-100 or not a number
    #[error("Invalid score {0}: must be between 0 and 100")]
    InvalidScore(f64),

    /// Unknown risk level name
    #[error("Invalid risk level: {0}")]
    InvalidLevel(String),

    /// Factor does not belong to the assessment
    #[error("Risk factor not found: {0}")]
    FactorNotFound(Uuid),

    /// Override without justification
    #[error("Override reason is required")]
    MissingOverrideReason,
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
