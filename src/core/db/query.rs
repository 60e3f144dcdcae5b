/// Query Execution Module
///
/// Every statement the core runs goes through `QueryExecutor::run_query`:
/// `[NOT] IN (?)` markers are expanded against array parameters, the
/// parameters are flattened, the statement is executed on the shared session
/// and the result is shaped according to the kind of statement.
use crate::core::db::clause::{count_placeholders, tokenize, TokenKind};
use crate::core::db::builder::quote_identifier;
use crate::core::db::connection::ConnectionManager;
use crate::core::db::driver::Execution;
use crate::core::db::value::{ColumnBag, Value};
use crate::core::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::debug;

static IN_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:NOT\s+)?IN\s*\(\s*\?\s*\)").expect("IN marker pattern is valid")
});

/// What kind of statement is being run; decides the shape of the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
}

/// Result of `run_query`, shaped by `Action`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Rows of a SELECT; the caller decides how to fetch them
    Rows(ResultSet),
    /// Identity generated by an INSERT
    InsertId(u64),
    /// Rows touched by an UPDATE or DELETE
    Affected(u64),
}

/// Raw rows of a result set: column names plus positional values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// A row shape a caller can fetch a result set into.
pub trait FromResultRow: Sized {
    fn from_result_row(columns: &[String], values: Vec<Value>) -> Self;
}

/// Associative rows keyed by column name.
impl FromResultRow for ColumnBag {
    fn from_result_row(columns: &[String], values: Vec<Value>) -> Self {
        columns.iter().cloned().zip(values).collect()
    }
}

/// Numerically indexed rows.
impl FromResultRow for Vec<Value> {
    fn from_result_row(_columns: &[String], values: Vec<Value>) -> Self {
        values
    }
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        ResultSet { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row, in the requested shape.
    pub fn fetch_all<R: FromResultRow>(self) -> Vec<R> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| R::from_result_row(&columns, row))
            .collect()
    }

    /// The first row, in the requested shape.
    pub fn fetch_first<R: FromResultRow>(self) -> Option<R> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .next()
            .map(|row| R::from_result_row(&columns, row))
    }

    /// One column of the first row.
    pub fn fetch_column(self, column: usize) -> Option<Value> {
        self.rows.into_iter().next()?.into_iter().nth(column)
    }
}

/// SQL text with positional placeholders and its flattened parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Expands `[NOT] IN (?)` markers and flattens array parameters.
///
/// Markers are paired left to right with the array parameters in positional
/// order; each marker's `?` becomes one `?` per array element. Afterwards
/// every array parameter is replaced by its elements, so the placeholder count
/// of the rewritten SQL equals the length of the parameter list.
pub fn expand_in_placeholders(sql: &str, params: &[Value]) -> Result<PreparedQuery> {
    let arrays: Vec<&Vec<Value>> = params
        .iter()
        .filter_map(|p| match p {
            Value::List(items) => Some(items),
            _ => None,
        })
        .collect();

    let mut rewritten = String::with_capacity(sql.len());
    let mut last = 0;
    let mut marker_count = 0;
    let literals: Vec<(usize, usize)> = tokenize(sql)
        .into_iter()
        .filter(|t| t.kind == TokenKind::Quoted)
        .map(|t| (t.start, t.end))
        .collect();
    let in_literal = |pos: usize| literals.iter().any(|&(start, end)| pos >= start && pos < end);

    for marker in IN_MARKER.find_iter(sql).filter(|m| !in_literal(m.start())) {
        let items = arrays.get(marker_count).ok_or_else(|| {
            GatewayError::Validation(
                "Must pass array of values when using \"[NOT] IN (?)\" in WHERE clause.".to_string(),
            )
        })?;
        if items.is_empty() {
            return Err(GatewayError::Validation(
                "Cannot expand \"[NOT] IN (?)\" with an empty array of values.".to_string(),
            ));
        }
        let text = marker.as_str();
        let question = text.rfind('?').unwrap_or(text.len() - 1);
        rewritten.push_str(&sql[last..marker.start()]);
        rewritten.push_str(&text[..question]);
        rewritten.push_str(&vec!["?"; items.len()].join(","));
        rewritten.push_str(&text[question + 1..]);
        last = marker.end();
        marker_count += 1;
    }
    rewritten.push_str(&sql[last..]);

    let mut flattened = Vec::with_capacity(params.len());
    for param in params {
        match param {
            Value::List(items) => {
                for item in items {
                    if item.is_list() {
                        return Err(GatewayError::Validation(
                            "Nested arrays cannot be bound as query parameters.".to_string(),
                        ));
                    }
                    flattened.push(item.clone());
                }
            }
            scalar => flattened.push(scalar.clone()),
        }
    }

    let placeholders = count_placeholders(&rewritten);
    if placeholders != flattened.len() {
        return Err(GatewayError::Validation(format!(
            "Statement has {} placeholders but {} parameters were bound.",
            placeholders,
            flattened.len()
        )));
    }

    Ok(PreparedQuery {
        sql: rewritten,
        params: flattened,
    })
}

/// Query execution service that operates on the shared session
pub struct QueryExecutor<'a> {
    connection: &'a ConnectionManager,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new QueryExecutor for the given connection
    pub fn new(connection: &'a ConnectionManager) -> Self {
        QueryExecutor { connection }
    }

    /// Runs a statement and shapes the outcome by `action`.
    ///
    /// # Errors
    ///
    /// `GatewayError::Validation` when an `IN (?)` marker has no array
    /// parameter or the parameter count does not match the placeholders;
    /// `GatewayError::Query` (carrying `sql` as given) when execution fails.
    pub fn run_query(&self, sql: &str, params: &[Value], action: Action) -> Result<QueryOutcome> {
        let execution = self.execute(sql, params)?;
        Ok(match action {
            Action::Select => QueryOutcome::Rows(execution.result),
            Action::Insert => QueryOutcome::InsertId(execution.last_insert_id),
            Action::Update | Action::Delete => QueryOutcome::Affected(execution.affected_rows),
        })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<Execution> {
        let prepared = expand_in_placeholders(sql, params)?;
        let started = Instant::now();

        let execution = self.connection.with_session(|session| {
            session
                .driver
                .execute(&prepared.sql, &prepared.params)
                .map_err(|e| GatewayError::Query {
                    sql: sql.to_string(),
                    message: e.message,
                })
        })?;

        debug!(
            sql = %prepared.sql,
            params = prepared.params.len(),
            rows = execution.result.row_count(),
            affected = execution.affected_rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(execution)
    }

    /// Runs a SELECT and returns the raw result set.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        Ok(self.execute(sql, params)?.result)
    }

    /// Runs an INSERT and returns the generated identity.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.execute(sql, params)?.last_insert_id)
    }

    /// Runs an UPDATE and returns the number of affected rows.
    pub fn update(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.execute(sql, params)?.affected_rows)
    }

    /// Runs a DELETE and returns the number of deleted rows.
    pub fn delete(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.execute(sql, params)?.affected_rows)
    }

    /// Single value: column `column` of the first row.
    pub fn get_one(&self, sql: &str, params: &[Value], column: usize) -> Result<Option<Value>> {
        Ok(self.query(sql, params)?.fetch_column(column))
    }

    /// First row in the requested shape.
    pub fn get_row<R: FromResultRow>(&self, sql: &str, params: &[Value]) -> Result<Option<R>> {
        Ok(self.query(sql, params)?.fetch_first())
    }

    /// First row as a column bag.
    pub fn get_first(&self, sql: &str, params: &[Value]) -> Result<Option<ColumnBag>> {
        self.get_row(sql, params)
    }

    /// All rows in the requested shape.
    pub fn get_all<R: FromResultRow>(&self, sql: &str, params: &[Value]) -> Result<Vec<R>> {
        Ok(self.query(sql, params)?.fetch_all())
    }

    /// `DESCRIBE` output for a table.
    pub fn describe(&self, table: &str) -> Result<Vec<ColumnBag>> {
        self.get_all(&format!("DESCRIBE {}", quote_identifier(table)?), &[])
    }

    /// `EXPLAIN` output for a statement.
    pub fn explain(&self, sql: &str, params: &[Value]) -> Result<Vec<ColumnBag>> {
        self.get_all(&format!("EXPLAIN {}", sql), params)
    }

    /// Whether a table with exactly this name exists in the current database.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let pattern = table
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let found = self.get_one("SHOW TABLES LIKE ?", &[Value::from(pattern)], 0)?;
        Ok(found.is_some())
    }

    /// `SHOW INDEXES FROM` output, optionally filtered by `extra_sql`
    /// (e.g. `WHERE Key_name = ?`).
    pub fn get_indexes(&self, table: &str, extra_sql: &str, params: &[Value]) -> Result<Vec<ColumnBag>> {
        let mut sql = format!("SHOW INDEXES FROM {}", quote_identifier(table)?);
        if !extra_sql.trim().is_empty() {
            sql.push(' ');
            sql.push_str(extra_sql.trim());
        }
        self.get_all(&sql, params)
    }
}
