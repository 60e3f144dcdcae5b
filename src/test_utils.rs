/// # Test Utilities Module
///
/// Testing infrastructure for the gateway without a MySQL server.
///
/// This module provides:
/// - A scripted in-memory `Driver` whose responses are keyed by SQL prefix
/// - A shared `ScriptHandle` for inspecting executed statements and steering
///   liveness, failures and transaction calls
/// - Manager and `Database` fixtures wired to the scripted driver
/// - A `DESCRIBE users` fixture
use crate::config::DatabaseConfig;
use crate::core::db::connection::ConnectionManager;
use crate::core::db::database::Database;
use crate::core::db::driver::{Connector, Driver, DriverError, Execution};
use crate::core::db::query::ResultSet;
use crate::core::db::value::Value;
use crate::core::{GatewayError, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared state behind every scripted driver opened from one handle
#[derive(Debug)]
struct Script {
    responses: Vec<(String, ResultSet)>,
    executed: Vec<(String, Vec<Value>)>,
    failures: Vec<String>,
    transactions: Vec<&'static str>,
    alive: bool,
    refuse: bool,
    opens: usize,
    insert_id: u64,
    affected_rows: u64,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            responses: Vec::new(),
            executed: Vec::new(),
            failures: Vec::new(),
            transactions: Vec::new(),
            alive: true,
            refuse: false,
            opens: 0,
            insert_id: 0,
            affected_rows: 1,
        }
    }
}

/// Handle for scripting and inspecting the fake server
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    fn state(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    /// Answers statements starting with `prefix`. The longest matching prefix
    /// wins; re-registering a prefix replaces its response.
    pub fn respond(&self, prefix: &str, result: ResultSet) {
        let mut state = self.state();
        state.responses.retain(|(p, _)| p != prefix);
        state.responses.push((prefix.to_string(), result));
    }

    pub fn clear_responses(&self) {
        self.state().responses.clear();
    }

    /// Statements with their bound parameters, in execution order.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state().executed.clone()
    }

    /// Executed statement texts only.
    pub fn statements(&self) -> Vec<String> {
        self.state().executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Statements containing `fragment` fail with a driver error.
    pub fn fail_on(&self, fragment: &str) {
        self.state().failures.push(fragment.to_string());
    }

    /// Makes pings fail as if the server went away.
    pub fn set_alive(&self, alive: bool) {
        self.state().alive = alive;
    }

    pub fn refuse_connections(&self) {
        self.state().refuse = true;
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn set_insert_id(&self, id: u64) {
        self.state().insert_id = id;
    }

    pub fn set_affected_rows(&self, rows: u64) {
        self.state().affected_rows = rows;
    }

    /// `BEGIN` / `COMMIT` / `ROLLBACK` calls, in order.
    pub fn transactions(&self) -> Vec<&'static str> {
        self.state().transactions.clone()
    }
}

/// In-memory driver answering from a script
pub struct ScriptedDriver {
    script: ScriptHandle,
}

impl Driver for ScriptedDriver {
    fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Execution, DriverError> {
        let mut state = self.script.state();
        state.executed.push((sql.to_string(), params.to_vec()));

        if state.failures.iter().any(|f| sql.contains(f.as_str())) {
            return Err(DriverError::new(format!("Table or statement rejected: {}", sql)));
        }

        let result = state
            .responses
            .iter()
            .filter(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, result)| result.clone())
            .unwrap_or_default();

        Ok(Execution {
            result,
            last_insert_id: state.insert_id,
            affected_rows: state.affected_rows,
        })
    }

    fn ping(&mut self) -> std::result::Result<(), DriverError> {
        if self.script.state().alive {
            Ok(())
        } else {
            Err(DriverError::gone_away("MySQL server has gone away"))
        }
    }

    fn begin(&mut self) -> std::result::Result<(), DriverError> {
        self.script.state().transactions.push("BEGIN");
        Ok(())
    }

    fn commit(&mut self) -> std::result::Result<(), DriverError> {
        self.script.state().transactions.push("COMMIT");
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        self.script.state().transactions.push("ROLLBACK");
        Ok(())
    }
}

/// Opens `ScriptedDriver`s sharing one script
pub struct ScriptedConnector {
    script: ScriptHandle,
}

impl ScriptedConnector {
    pub fn new(script: ScriptHandle) -> Self {
        ScriptedConnector { script }
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, config: &DatabaseConfig) -> Result<Box<dyn Driver>> {
        let mut state = self.script.state();
        if state.refuse {
            return Err(GatewayError::Connection(format!(
                "Unable to connect to database server {}:{}",
                config.host, config.port
            )));
        }
        state.opens += 1;
        state.alive = true;
        Ok(Box::new(ScriptedDriver {
            script: self.script.clone(),
        }))
    }
}

pub fn test_config() -> DatabaseConfig {
    DatabaseConfig::new("localhost", "app_test", "tester", "secret")
}

pub fn scripted_manager() -> (ConnectionManager, ScriptHandle) {
    let script = ScriptHandle::default();
    let manager = ConnectionManager::new(test_config(), Box::new(ScriptedConnector::new(script.clone())));
    (manager, script)
}

pub fn scripted_database() -> (Database, ScriptHandle) {
    let (manager, script) = scripted_manager();
    (Database::new(manager), script)
}

pub fn result_set(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
    ResultSet::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

/// `DESCRIBE users` for a table with an auto-increment `id`, a NOT NULL
/// `name`, an enum `status` and a few nullable columns.
pub fn users_describe() -> ResultSet {
    let column = |field: &str, ty: &str, null: &str, key: &str, default: Value, extra: &str| {
        vec![
            Value::from(field),
            Value::from(ty),
            Value::from(null),
            Value::from(key),
            default,
            Value::from(extra),
        ]
    };
    result_set(
        &["Field", "Type", "Null", "Key", "Default", "Extra"],
        vec![
            column("id", "int(11) unsigned", "NO", "PRI", Value::Null, "auto_increment"),
            column("name", "varchar(64)", "NO", "", Value::Null, ""),
            column("age", "int(11)", "YES", "", Value::Null, ""),
            column("bio", "text", "YES", "", Value::Null, ""),
            column(
                "status",
                "enum('active','inactive','on''hold')",
                "NO",
                "",
                Value::from("active"),
                "",
            ),
            column("created_at", "datetime", "YES", "", Value::Null, ""),
        ],
    )
}
