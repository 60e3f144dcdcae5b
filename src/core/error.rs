/// Tablegate Error Module
///
/// This module defines the error taxonomy shared by every layer of the
/// data-access core. Builders, the executor, the schema cache and the record
/// gateway all return the same `GatewayError` so callers can match on the
/// failure class without caring which component raised it.
use thiserror::Error;

/// Error type for the data-access core.
///
/// - `Connection`: a session could not be established or re-established
/// - `Schema`: table or column metadata is unavailable
/// - `Validation`: malformed builder input, raised before any I/O
/// - `Query`: statement execution failed on the server
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Cannot establish or re-establish a database session
    #[error("Connection error: {0}")]
    Connection(String),

    /// Table or column metadata unavailable
    #[error("Schema error: {0}")]
    Schema(String),

    /// Malformed input to a builder or executor
    #[error("Validation error: {0}")]
    Validation(String),

    /// Statement execution failed; carries the SQL exactly as the caller supplied it
    #[error("Query error: {message} (SQL: {sql})")]
    Query { sql: String, message: String },

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic application errors for unexpected conditions
    #[error("Application error: {0}")]
    App(String),
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

/// Type alias for Result to use GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;
