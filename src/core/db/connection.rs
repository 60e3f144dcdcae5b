/// Connection Management Module
///
/// This module owns the single database session: it opens it lazily, probes
/// it before reuse, reconnects once when the probe fails, and tracks the
/// session's transaction state. It also provides value sanitization backed by
/// the live session's native escaping.

use crate::config::DatabaseConfig;
use crate::core::db::builder::Escape;
use crate::core::db::driver::{escape_generic, Connector, Driver};
use crate::core::db::mysql::MySqlConnector;
use crate::core::{GatewayError, Result};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// Transaction in progress
    Active,
}

/// A live session: the driver plus its transaction state.
pub struct Session {
    pub driver: Box<dyn Driver>,
    pub transaction: TransactionState,
}

impl Session {
    fn new(driver: Box<dyn Driver>) -> Self {
        Session {
            driver,
            transaction: TransactionState::Autocommit,
        }
    }
}

/// Connection manager for the one shared session
pub struct ConnectionManager {
    config: DatabaseConfig,
    connector: Box<dyn Connector>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Creates a manager that opens sessions through `connector`. No session
    /// is opened until the first `connect` or query.
    pub fn new(config: DatabaseConfig, connector: Box<dyn Connector>) -> Self {
        ConnectionManager {
            config,
            connector,
            session: Mutex::new(None),
        }
    }

    /// Creates a manager for a MySQL server.
    pub fn mysql(config: DatabaseConfig) -> Self {
        Self::new(config, Box::new(MySqlConnector))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Session>>> {
        self.session
            .lock()
            .map_err(|_| GatewayError::App("Failed to acquire database lock".to_string()))
    }

    fn open(&self) -> Result<Session> {
        let driver = self.connector.open(&self.config)?;
        Ok(Session::new(driver))
    }

    /// Ensures a usable session exists.
    ///
    /// An existing session is reused when its ping succeeds; otherwise exactly
    /// one fresh session is opened, which starts outside any transaction.
    ///
    /// # Errors
    ///
    /// `GatewayError::Connection` when the server cannot be reached.
    pub fn connect(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(session) = guard.as_mut() {
            if Self::ping(session.driver.as_mut()) {
                return Ok(());
            }
            warn!(host = %self.config.host, "Database session is no longer alive; reconnecting");
            *guard = None;
        }

        *guard = Some(self.open()?);
        info!(host = %self.config.host, database = %self.config.name, "Database session established");
        Ok(())
    }

    /// Probes a driver. False when the server has gone away or the probe
    /// fails for any other reason.
    pub fn ping(driver: &mut dyn Driver) -> bool {
        match driver.ping() {
            Ok(()) => true,
            Err(e) if e.gone_away => {
                debug!("Ping reported server gone away: {}", e);
                false
            }
            Err(e) => {
                debug!("Ping failed: {}", e);
                false
            }
        }
    }

    /// Drops the session, if any.
    pub fn close(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }

    /// Checks if there's an open session (without probing it)
    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Runs `f` against the session, opening one first if none exists.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        match guard.as_mut() {
            Some(session) => f(session),
            None => Err(GatewayError::Connection("No database session available".to_string())),
        }
    }

    /// Transaction state of the current session; `Autocommit` when there is
    /// no session.
    pub fn transaction_state(&self) -> TransactionState {
        self.session
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.transaction))
            .unwrap_or_default()
    }

    /// Escapes `value` for inline embedding between single quotes.
    ///
    /// Uses the live session's escaping; without a session, falls back to a
    /// generic backslash escape.
    pub fn sanitize(&self, value: &str) -> String {
        if let Ok(guard) = self.session.lock() {
            if let Some(session) = guard.as_ref() {
                return session.driver.escape(value);
            }
        }
        debug!("No live database session; sanitizing with generic escape");
        escape_generic(value)
    }
}

impl Escape for ConnectionManager {
    fn escape(&self, raw: &str) -> String {
        self.sanitize(raw)
    }
}
