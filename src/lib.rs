// Core infrastructure modules
pub mod config;
pub mod core;

// Feature-specific modules
pub mod record;

#[cfg(test)]
mod test_utils;

pub use crate::core::db::{ColumnBag, Database, PrimaryKey, TermSearch, Value};
pub use crate::core::{GatewayError, Result};
pub use crate::record::{Record, RecordState};
