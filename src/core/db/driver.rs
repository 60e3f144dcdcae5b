/// Driver Seam Module
///
/// The rest of the core never talks to a client library directly. A `Driver`
/// is one live session that can execute SQL with positional parameters, probe
/// its own health, escape text and run transaction statements. A `Connector`
/// opens drivers from configuration. The production pair lives in `mysql.rs`;
/// tests plug in a scripted driver.
use crate::config::DatabaseConfig;
use crate::core::db::query::ResultSet;
use crate::core::db::value::Value;
use crate::core::Result;
use thiserror::Error;

/// Failure reported by a driver.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    /// The server closed the session ("server has gone away").
    pub gone_away: bool,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError {
            message: message.into(),
            gone_away: false,
        }
    }

    pub fn gone_away(message: impl Into<String>) -> Self {
        DriverError {
            message: message.into(),
            gone_away: true,
        }
    }
}

/// Everything a single statement execution reports back.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// Rows produced by the statement (empty for DML)
    pub result: ResultSet,
    /// Identity generated by the last INSERT on this session
    pub last_insert_id: u64,
    /// Rows changed by an UPDATE/DELETE (or written by an INSERT)
    pub affected_rows: u64,
}

/// One live database session.
pub trait Driver: Send {
    /// Prepares and executes `sql`, binding `params` to its `?` placeholders
    /// in order. Parameters are already flattened scalars.
    fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Execution, DriverError>;

    /// Lightweight status probe.
    fn ping(&mut self) -> std::result::Result<(), DriverError>;

    /// Escapes `raw` for embedding between single quotes.
    fn escape(&self, raw: &str) -> String {
        escape_generic(raw)
    }

    fn begin(&mut self) -> std::result::Result<(), DriverError>;

    fn commit(&mut self) -> std::result::Result<(), DriverError>;

    fn rollback(&mut self) -> std::result::Result<(), DriverError>;
}

/// Opens driver sessions.
pub trait Connector: Send + Sync {
    /// Opens a fresh session. Fails with `GatewayError::Connection` when the
    /// server cannot be reached or refuses the credentials.
    fn open(&self, config: &DatabaseConfig) -> Result<Box<dyn Driver>>;
}

/// Last-resort escaping used when no session is available: backslash-escapes
/// quotes, backslashes and NUL bytes.
pub fn escape_generic(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\'' | '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\0' => escaped.push_str("\\0"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_generic() {
        assert_eq!(escape_generic("plain"), "plain");
        assert_eq!(escape_generic("O'Brien"), "O\\'Brien");
        assert_eq!(escape_generic(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_generic("back\\slash"), "back\\\\slash");
        assert_eq!(escape_generic("nul\0byte"), "nul\\0byte");
    }

    #[test]
    fn test_driver_error_flags() {
        assert!(!DriverError::new("syntax").gone_away);
        let err = DriverError::gone_away("MySQL server has gone away");
        assert!(err.gone_away);
        assert_eq!(err.to_string(), "MySQL server has gone away");
    }
}
