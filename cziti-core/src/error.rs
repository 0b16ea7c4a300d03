//! Error types for cziti-core.

use thiserror::Error;

/// A service's tunneling configuration could not be used for interception.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The service carries no tunneler config at all.
    #[error("service has no '{config_type}' configuration")]
    Missing { config_type: &'static str },

    /// The raw config was not valid JSON for the expected shape.
    #[error("tunneler config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tunneler config has an empty hostname")]
    EmptyHostname,
}

/// The DNS registrar refused or failed to assign an intercept address.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("hostname '{host}' is already intercepted by another service")]
    Conflict { host: String },

    #[error("no intercept addresses left to assign")]
    PoolExhausted,

    #[error("dns registrar error: {0}")]
    Other(String),
}
