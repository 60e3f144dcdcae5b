/// Schema Introspection Module
///
/// This module provides table metadata for the record layer: ordered column
/// descriptors from `DESCRIBE`, the derived primary key, nullability, default
/// and enum views, and the accessor-name table. Each table is described once
/// and memoized for the lifetime of the cache.
use crate::core::db::naming::{to_camel_case, to_pascal_case, to_snake_case};
use crate::core::db::query::QueryExecutor;
use crate::core::db::value::{ColumnBag, Value};
use crate::core::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

static ENUM_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^enum\((.*)\)$").expect("enum pattern is valid"));

/// Represents a table column with its metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Server type, e.g. `int(11) unsigned` or `enum('a','b')`
    pub column_type: String,
    /// Whether the column allows NULL values
    pub nullable: bool,
    /// Key flag: `PRI`, `UNI`, `MUL` or empty
    pub key: String,
    /// Default value expression (if any)
    pub default: Option<String>,
    /// Extra attributes, e.g. `auto_increment`
    pub extra: String,
}

impl ColumnDescriptor {
    /// Creates a ColumnDescriptor from a `DESCRIBE` result row
    fn from_describe_row(table: &str, row: &ColumnBag) -> Result<Self> {
        let text = |column: &str| -> Option<String> {
            match row.get(column) {
                None | Some(Value::Null) => None,
                Some(value) => value.sql_text().map(|t| t.into_owned()),
            }
        };

        let name = text("Field").filter(|n| !n.is_empty()).ok_or_else(|| {
            GatewayError::Schema(format!("Malformed column metadata for table {}", table))
        })?;

        Ok(ColumnDescriptor {
            name,
            column_type: text("Type").unwrap_or_default(),
            nullable: text("Null").map_or(false, |n| n.eq_ignore_ascii_case("YES")),
            key: text("Key").unwrap_or_default(),
            default: text("Default"),
            extra: text("Extra").unwrap_or_default(),
        })
    }

    pub fn is_primary_key(&self) -> bool {
        self.key.eq_ignore_ascii_case("PRI")
    }

    pub fn is_auto_increment(&self) -> bool {
        self.extra.to_ascii_lowercase().contains("auto_increment")
    }

    /// Members of an `enum(...)` type, unescaped. None for other types.
    pub fn enum_values(&self) -> Option<Vec<String>> {
        let captures = ENUM_TYPE.captures(&self.column_type)?;
        scan_enum_members(&captures[1])
    }
}

/// Splits `'a','b''c'` into its quoted members. A doubled quote or a
/// backslash escape stays inside the member. None when the list is malformed.
fn scan_enum_members(list: &str) -> Option<Vec<String>> {
    let mut members = Vec::new();
    let mut chars = list.chars().peekable();
    loop {
        if chars.next()? != '\'' {
            return None;
        }
        let mut member = String::new();
        loop {
            match chars.next()? {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    member.push('\'');
                }
                '\'' => break,
                '\\' => member.push(chars.next()?),
                c => member.push(c),
            }
        }
        members.push(member);
        match chars.next() {
            None => return Some(members),
            Some(',') => continue,
            Some(_) => return None,
        }
    }
}

/// A table's primary key, in metadata order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PrimaryKey {
    None,
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKey {
    fn from_columns(mut columns: Vec<String>) -> Self {
        match columns.len() {
            0 => PrimaryKey::None,
            1 => PrimaryKey::Single(columns.remove(0)),
            _ => PrimaryKey::Composite(columns),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            PrimaryKey::None => Vec::new(),
            PrimaryKey::Single(column) => vec![column.as_str()],
            PrimaryKey::Composite(columns) => columns.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PrimaryKey::None)
    }

    /// The column of a single-column key.
    pub fn single(&self) -> Option<&str> {
        match self {
            PrimaryKey::Single(column) => Some(column.as_str()),
            _ => None,
        }
    }
}

/// A described table
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns in metadata order
    pub columns: Vec<ColumnDescriptor>,
    /// Accessor name (`FooBar`, `fooBar`, `foo_bar`) → column
    accessors: HashMap<String, String>,
}

impl TableSchema {
    /// Builds the schema from `DESCRIBE` rows.
    ///
    /// # Errors
    ///
    /// `GatewayError::Schema` when there are no rows or a row has no field
    /// name.
    pub fn from_describe(table: &str, rows: &[ColumnBag]) -> Result<Self> {
        if rows.is_empty() {
            return Err(GatewayError::Schema(format!(
                "Unable to retrieve column metadata for table {}",
                table
            )));
        }

        let columns = rows
            .iter()
            .map(|row| ColumnDescriptor::from_describe_row(table, row))
            .collect::<Result<Vec<_>>>()?;

        let mut accessors = HashMap::with_capacity(columns.len() * 3);
        for column in &columns {
            accessors.insert(to_pascal_case(&column.name), column.name.clone());
            accessors.insert(to_camel_case(&column.name), column.name.clone());
            accessors.insert(column.name.clone(), column.name.clone());
        }

        Ok(TableSchema {
            name: table.to_string(),
            columns,
            accessors,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Ordered (name, nullable) pairs.
    pub fn nullability(&self) -> Vec<(String, bool)> {
        self.columns.iter().map(|c| (c.name.clone(), c.nullable)).collect()
    }

    pub fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::from_columns(
            self.columns
                .iter()
                .filter(|c| c.is_primary_key())
                .map(|c| c.name.clone())
                .collect(),
        )
    }

    /// Column → default, `Null` where the column has none.
    pub fn default_values(&self) -> ColumnBag {
        self.columns
            .iter()
            .map(|c| {
                let default = c.default.clone().map(Value::Text).unwrap_or(Value::Null);
                (c.name.clone(), default)
            })
            .collect()
    }

    pub fn auto_increment_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.is_auto_increment())
            .map(|c| c.name.as_str())
    }

    /// # Errors
    ///
    /// `GatewayError::Schema` when the column is missing or not an enum.
    pub fn enum_values(&self, column: &str) -> Result<Vec<String>> {
        let descriptor = self.column(column).ok_or_else(|| {
            GatewayError::Schema(format!("Column {} does not exist in table {}", column, self.name))
        })?;
        descriptor.enum_values().ok_or_else(|| {
            GatewayError::Schema(format!(
                "Column {} in table {} is not an enum",
                column, self.name
            ))
        })
    }

    /// Column for an accessor name like `FooBar`, or None.
    pub fn resolve_accessor(&self, name: &str) -> Option<&str> {
        if let Some(column) = self.accessors.get(name) {
            return Some(column.as_str());
        }
        let snake = to_snake_case(name);
        self.column(&snake).map(|c| c.name.as_str())
    }
}

/// Per-table metadata cache. Entries are never invalidated.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: Mutex<HashMap<String, Arc<TableSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, table: &str) -> Option<Arc<TableSchema>> {
        self.tables.lock().ok().and_then(|tables| tables.get(table).cloned())
    }

    /// Describes `table`, querying the server only on the first call.
    ///
    /// # Errors
    ///
    /// `GatewayError::Schema` when the table does not exist or has no
    /// metadata.
    pub fn describe(&self, executor: &QueryExecutor<'_>, table: &str) -> Result<Arc<TableSchema>> {
        if let Some(schema) = self.cached(table) {
            return Ok(schema);
        }

        let rows = executor.describe(table).map_err(|e| match e {
            GatewayError::Query { message, .. } => GatewayError::Schema(format!(
                "Unable to describe table {}: {}",
                table, message
            )),
            other => other,
        })?;
        let schema = Arc::new(TableSchema::from_describe(table, &rows)?);
        debug!(table, columns = schema.columns.len(), "Table schema loaded");

        let mut tables = self
            .tables
            .lock()
            .map_err(|_| GatewayError::App("Failed to acquire schema cache lock".to_string()))?;
        Ok(tables.entry(table.to_string()).or_insert(schema).clone())
    }

    pub fn get_columns(&self, executor: &QueryExecutor<'_>, table: &str) -> Result<Vec<(String, bool)>> {
        Ok(self.describe(executor, table)?.nullability())
    }

    pub fn get_column_names(&self, executor: &QueryExecutor<'_>, table: &str) -> Result<Vec<String>> {
        Ok(self.describe(executor, table)?.column_names())
    }

    pub fn get_primary_key(&self, executor: &QueryExecutor<'_>, table: &str) -> Result<PrimaryKey> {
        Ok(self.describe(executor, table)?.primary_key())
    }

    pub fn get_enum_values(&self, executor: &QueryExecutor<'_>, table: &str, column: &str) -> Result<Vec<String>> {
        self.describe(executor, table)?.enum_values(column)
    }

    pub fn get_default_values(&self, executor: &QueryExecutor<'_>, table: &str) -> Result<ColumnBag> {
        Ok(self.describe(executor, table)?.default_values())
    }

    pub fn column_exists(&self, executor: &QueryExecutor<'_>, table: &str, column: &str) -> Result<bool> {
        Ok(self.describe(executor, table)?.has_column(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scripted_manager, users_describe};

    #[test]
    fn test_schema_introspection() {
        let (manager, script) = scripted_manager();
        script.respond("DESCRIBE `users`", users_describe());
        let executor = QueryExecutor::new(&manager);
        let cache = SchemaCache::new();

        let schema = cache.describe(&executor, "users").unwrap();
        assert_eq!(schema.name, "users");
        assert_eq!(
            schema.column_names(),
            vec!["id", "name", "age", "bio", "status", "created_at"]
        );
        assert_eq!(schema.primary_key(), PrimaryKey::Single("id".to_string()));
        assert_eq!(schema.auto_increment_column(), Some("id"));

        let columns = cache.get_columns(&executor, "users").unwrap();
        assert_eq!(columns[1], ("name".to_string(), false));
        assert_eq!(columns[2], ("age".to_string(), true));
    }

    #[test]
    fn test_metadata_is_queried_once_per_table() {
        let (manager, script) = scripted_manager();
        script.respond("DESCRIBE `users`", users_describe());
        let executor = QueryExecutor::new(&manager);
        let cache = SchemaCache::new();

        cache.describe(&executor, "users").unwrap();
        cache.get_primary_key(&executor, "users").unwrap();
        cache.get_default_values(&executor, "users").unwrap();

        let describes = script
            .executed()
            .iter()
            .filter(|(sql, _)| sql.starts_with("DESCRIBE"))
            .count();
        assert_eq!(describes, 1);
    }

    #[test]
    fn test_enum_values_and_defaults() {
        let (manager, script) = scripted_manager();
        script.respond("DESCRIBE `users`", users_describe());
        let executor = QueryExecutor::new(&manager);
        let cache = SchemaCache::new();

        assert_eq!(
            cache.get_enum_values(&executor, "users", "status").unwrap(),
            vec!["active", "inactive", "on'hold"]
        );
        assert!(matches!(
            cache.get_enum_values(&executor, "users", "name"),
            Err(GatewayError::Schema(_))
        ));
        assert!(matches!(
            cache.get_enum_values(&executor, "users", "missing"),
            Err(GatewayError::Schema(_))
        ));

        let defaults = cache.get_default_values(&executor, "users").unwrap();
        assert_eq!(defaults.get("status"), Some(&Value::from("active")));
        assert_eq!(defaults.get("name"), Some(&Value::Null));
    }

    #[test]
    fn test_missing_table_is_schema_error() {
        let (manager, script) = scripted_manager();
        script.fail_on("DESCRIBE `ghosts`");
        let executor = QueryExecutor::new(&manager);
        let cache = SchemaCache::new();

        assert!(matches!(cache.describe(&executor, "ghosts"), Err(GatewayError::Schema(_))));
        // Empty metadata
        assert!(matches!(cache.describe(&executor, "empty"), Err(GatewayError::Schema(_))));
    }

    #[test]
    fn test_composite_primary_key_and_accessors() {
        let rows: Vec<ColumnBag> = ["user_id", "group_id"]
            .iter()
            .map(|name| {
                let mut row = ColumnBag::new();
                row.insert("Field", Value::from(*name));
                row.insert("Type", Value::from("int(11)"));
                row.insert("Null", Value::from("NO"));
                row.insert("Key", Value::from("PRI"));
                row.insert("Default", Value::Null);
                row.insert("Extra", Value::from(""));
                row
            })
            .collect();
        let schema = TableSchema::from_describe("memberships", &rows).unwrap();

        assert_eq!(
            schema.primary_key(),
            PrimaryKey::Composite(vec!["user_id".to_string(), "group_id".to_string()])
        );
        assert_eq!(schema.primary_key().columns(), vec!["user_id", "group_id"]);
        assert_eq!(schema.auto_increment_column(), None);
        assert_eq!(schema.resolve_accessor("UserId"), Some("user_id"));
        assert_eq!(schema.resolve_accessor("groupId"), Some("group_id"));
        assert_eq!(schema.resolve_accessor("Missing"), None);
    }

    #[test]
    fn test_enum_members_with_embedded_separator() {
        let descriptor = |column_type: &str| ColumnDescriptor {
            name: "kind".to_string(),
            column_type: column_type.to_string(),
            nullable: false,
            key: String::new(),
            default: None,
            extra: String::new(),
        };

        assert_eq!(
            descriptor("enum('a','x'',''y','b')").enum_values(),
            Some(vec!["a".to_string(), "x','y".to_string(), "b".to_string()])
        );
        assert_eq!(
            descriptor(r"enum('back\\slash','')").enum_values(),
            Some(vec![r"back\slash".to_string(), String::new()])
        );
        assert_eq!(descriptor("enum('open)").enum_values(), None);
        assert_eq!(descriptor("enum('a' 'b')").enum_values(), None);
        assert_eq!(descriptor("varchar(10)").enum_values(), None);
    }

    #[test]
    fn test_table_without_primary_key() {
        let rows: Vec<ColumnBag> = [("event", ""), ("logged_at", "MUL")]
            .iter()
            .map(|(name, key)| {
                let mut row = ColumnBag::new();
                row.insert("Field", Value::from(*name));
                row.insert("Type", Value::from("varchar(64)"));
                row.insert("Null", Value::from("YES"));
                row.insert("Key", Value::from(*key));
                row.insert("Default", Value::Null);
                row.insert("Extra", Value::from(""));
                row
            })
            .collect();
        let schema = TableSchema::from_describe("audit_log", &rows).unwrap();

        assert_eq!(schema.primary_key(), PrimaryKey::None);
        assert!(schema.primary_key().is_none());
        assert!(schema.primary_key().columns().is_empty());
        assert_eq!(schema.auto_increment_column(), None);
    }
}
