/// Core Module for Tablegate
///
/// This module contains the data-access core: the connection and session
/// handling, SQL synthesis, query execution, schema caching and transaction
/// coordination, together with the shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{GatewayError, Result};
