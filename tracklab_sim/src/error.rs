//! Errors raised by the simulation harness.

use thiserror::Error;
use tracklab_core::ModelError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// A scenario assertion did not hold
    #[error("Check failed: {0}")]
    Check(String),
}
