//! Error types for awsgate infrastructure.

/// Errors raised while assembling the gateway (configuration, startup wiring).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result type for gateway setup.
pub type GatewayResult<T> = Result<T, GatewayError>;
