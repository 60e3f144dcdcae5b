/// Transaction Module
///
/// Flat transactions on the shared session. Nesting is not supported: a
/// second `start_transaction` while one is active is a no-op, and
/// commit/rollback only act on an active transaction.
use crate::core::db::connection::{ConnectionManager, TransactionState};
use crate::core::{GatewayError, Result};
use tracing::{debug, info};

/// Begin/commit/rollback against one connection manager.
pub struct TransactionCoordinator<'a> {
    connection: &'a ConnectionManager,
}

impl<'a> TransactionCoordinator<'a> {
    pub fn new(connection: &'a ConnectionManager) -> Self {
        TransactionCoordinator { connection }
    }

    /// Begins a transaction unless one is already active. Returns true
    /// either way.
    pub fn start_transaction(&self) -> Result<bool> {
        self.connection.with_session(|session| {
            if session.transaction == TransactionState::Active {
                debug!("Transaction already active; start_transaction ignored");
                return Ok(true);
            }
            session
                .driver
                .begin()
                .map_err(|e| GatewayError::Query {
                    sql: "START TRANSACTION".to_string(),
                    message: e.message,
                })?;
            session.transaction = TransactionState::Active;
            info!("Transaction started");
            Ok(true)
        })
    }

    /// Commits the active transaction. False when none was active.
    pub fn commit(&self) -> Result<bool> {
        self.connection.with_session(|session| {
            if session.transaction != TransactionState::Active {
                return Ok(false);
            }
            session.driver.commit().map_err(|e| GatewayError::Query {
                sql: "COMMIT".to_string(),
                message: e.message,
            })?;
            session.transaction = TransactionState::Autocommit;
            info!("Transaction committed");
            Ok(true)
        })
    }

    /// Rolls back the active transaction. False when none was active.
    ///
    /// The session leaves the transaction even when the rollback itself
    /// fails.
    pub fn rollback(&self) -> Result<bool> {
        self.connection.with_session(|session| {
            if session.transaction != TransactionState::Active {
                return Ok(false);
            }
            session.transaction = TransactionState::Autocommit;
            session.driver.rollback().map_err(|e| GatewayError::Query {
                sql: "ROLLBACK".to_string(),
                message: e.message,
            })?;
            info!("Transaction rolled back");
            Ok(true)
        })
    }

    pub fn in_transaction(&self) -> bool {
        self.connection.transaction_state() == TransactionState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scripted_manager;

    #[test]
    fn test_transaction_lifecycle() {
        let (manager, script) = scripted_manager();
        let tx = TransactionCoordinator::new(&manager);

        assert!(!tx.in_transaction());
        assert!(tx.start_transaction().unwrap());
        assert!(tx.in_transaction());
        assert!(tx.commit().unwrap());
        assert!(!tx.in_transaction());
        assert_eq!(script.transactions(), vec!["BEGIN", "COMMIT"]);

        // Nothing left to roll back once committed
        assert!(!tx.rollback().unwrap());
        assert!(!tx.in_transaction());
        assert_eq!(script.transactions(), vec!["BEGIN", "COMMIT"]);
    }

    #[test]
    fn test_nested_start_is_noop() {
        let (manager, script) = scripted_manager();
        let tx = TransactionCoordinator::new(&manager);

        assert!(tx.start_transaction().unwrap());
        assert!(tx.start_transaction().unwrap());
        assert!(tx.rollback().unwrap());

        assert_eq!(script.transactions(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_commit_without_transaction() {
        let (manager, script) = scripted_manager();
        let tx = TransactionCoordinator::new(&manager);

        assert!(!tx.commit().unwrap());
        assert!(!tx.rollback().unwrap());
        assert!(script.transactions().is_empty());
    }

    #[test]
    fn test_reconnect_resets_transaction_state() {
        let (manager, script) = scripted_manager();
        let tx = TransactionCoordinator::new(&manager);

        tx.start_transaction().unwrap();
        script.set_alive(false);
        manager.connect().unwrap();
        assert!(!tx.in_transaction());
    }
}
