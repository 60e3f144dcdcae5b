/// Database Module
///
/// This module provides the data-access layer, organized into focused
/// submodules.
///
/// ## Architecture
///
/// - **Driver seam** (`driver.rs`, `mysql.rs`): the session trait and its MySQL implementation
/// - **Connection Management** (`connection.rs`): lazy sessions, ping/reconnect, sanitizing
/// - **Schema Introspection** (`schema.rs`, `naming.rs`): cached table metadata and accessor names
/// - **SQL Synthesis** (`builder.rs`, `clause.rs`): INSERT/UPDATE builders and SELECT rewriting
/// - **Query Execution** (`query.rs`): `IN (?)` expansion and result shaping
/// - **Transactions** (`transaction.rs`): flat begin/commit/rollback
/// - **Context** (`database.rs`): the `Database` handle tying these together
///
/// ## Error Handling
///
/// All database operations use the standardized `GatewayError` type for consistent error propagation.
pub mod builder;
pub mod clause;
pub mod connection;
pub mod database;
pub mod driver;
pub mod mysql;
pub mod naming;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod value;

pub use builder::{quote_identifier, Escape, GenericEscape, SqlBuilder, TermSearch};
pub use connection::{ConnectionManager, TransactionState};
pub use database::Database;
pub use driver::{Connector, Driver, DriverError, Execution};
pub use query::{expand_in_placeholders, Action, FromResultRow, PreparedQuery, QueryExecutor, QueryOutcome, ResultSet};
pub use schema::{ColumnDescriptor, PrimaryKey, SchemaCache, TableSchema};
pub use transaction::TransactionCoordinator;
pub use value::{sort_rows, ColumnBag, SortDirection, Value};
