/// Database Context Module
///
/// `Database` is the handle callers pass around: it owns the one connection
/// manager and the schema cache, and hands out query executors, SQL builders,
/// transaction coordinators and records bound to them.
use crate::config::DatabaseConfig;
use crate::core::db::builder::SqlBuilder;
use crate::core::db::connection::ConnectionManager;
use crate::core::db::query::QueryExecutor;
use crate::core::db::schema::{PrimaryKey, SchemaCache, TableSchema};
use crate::core::db::transaction::TransactionCoordinator;
use crate::core::db::value::ColumnBag;
use crate::core::Result;
use crate::record::Record;
use std::sync::Arc;

/// Connection plus schema cache for one database.
pub struct Database {
    connection: ConnectionManager,
    schema: SchemaCache,
}

impl Database {
    pub fn new(connection: ConnectionManager) -> Self {
        Database {
            connection,
            schema: SchemaCache::new(),
        }
    }

    /// Connects to a MySQL server right away.
    ///
    /// # Errors
    ///
    /// `GatewayError::Connection` when the server cannot be reached.
    pub fn connect(config: DatabaseConfig) -> Result<Self> {
        let database = Self::new(ConnectionManager::mysql(config));
        database.connection.connect()?;
        Ok(database)
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(&self.connection)
    }

    pub fn transactions(&self) -> TransactionCoordinator<'_> {
        TransactionCoordinator::new(&self.connection)
    }

    /// A builder escaping through the live session.
    pub fn builder(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.connection)
    }

    pub fn describe_table(&self, table: &str) -> Result<Arc<TableSchema>> {
        self.schema.describe(&self.executor(), table)
    }

    pub fn get_columns(&self, table: &str) -> Result<Vec<(String, bool)>> {
        self.schema.get_columns(&self.executor(), table)
    }

    pub fn get_column_names(&self, table: &str) -> Result<Vec<String>> {
        self.schema.get_column_names(&self.executor(), table)
    }

    pub fn get_primary_key(&self, table: &str) -> Result<PrimaryKey> {
        self.schema.get_primary_key(&self.executor(), table)
    }

    pub fn get_enum_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        self.schema.get_enum_values(&self.executor(), table, column)
    }

    pub fn get_default_values(&self, table: &str) -> Result<ColumnBag> {
        self.schema.get_default_values(&self.executor(), table)
    }

    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.schema.column_exists(&self.executor(), table, column)
    }

    /// A new record for `table` with an explicit primary key.
    pub fn record(&self, table: &str, primary_key: PrimaryKey) -> Record<'_> {
        Record::new(self, table, primary_key)
    }

    /// A new record for `table`, taking the primary key from the schema.
    pub fn table(&self, table: &str) -> Result<Record<'_>> {
        let primary_key = self.get_primary_key(table)?;
        Ok(Record::new(self, table, primary_key))
    }
}
