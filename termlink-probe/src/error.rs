//! Probe error types.

use termlink_core::GatewayError;
use thiserror::Error;

/// Probe-level errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Gateway error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
