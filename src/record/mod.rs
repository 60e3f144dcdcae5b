/// Record Module
///
/// A `Record` is a generic row of one table: a bag of the columns that were
/// loaded or explicitly set, plus the lifecycle to load it by condition or
/// primary key and to save it back as an INSERT, an identity-scoped UPDATE,
/// or an upsert.
use crate::core::db::builder::TermSearch;
use crate::core::db::database::Database;
use crate::core::db::schema::PrimaryKey;
use crate::core::db::value::{ColumnBag, Value};
use crate::core::db::quote_identifier;
use crate::core::{GatewayError, Result};
use tracing::debug;

/// Where a record is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Not loaded; may hold explicitly set columns
    New,
    /// Populated from a fetched row
    Loaded,
    /// Changed after being loaded or saved
    Dirty,
    /// Written by `save`
    Persisted,
}

/// One row of a table, holding only touched columns.
pub struct Record<'db> {
    db: &'db Database,
    table: String,
    primary_key: PrimaryKey,
    cols: ColumnBag,
    state: RecordState,
    validate: bool,
}

impl<'db> Record<'db> {
    /// Creates an empty record. Explicit sets are checked against the table
    /// schema unless validation is turned off.
    pub fn new(db: &'db Database, table: &str, primary_key: PrimaryKey) -> Self {
        Record {
            db,
            table: table.to_string(),
            primary_key,
            cols: ColumnBag::new(),
            state: RecordState::New,
            validate: true,
        }
    }

    /// Turns off schema checks on `set`.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    fn touch(&mut self) {
        self.state = match self.state {
            RecordState::New => RecordState::New,
            _ => RecordState::Dirty,
        };
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cols.get(column)
    }

    /// Sets a column value.
    ///
    /// # Errors
    ///
    /// `GatewayError::Validation` when validation is on and the table has no
    /// such column; `GatewayError::Schema` when the table cannot be described.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        if self.validate && !self.db.column_exists(&self.table, column)? {
            return Err(GatewayError::Validation(format!(
                "Column {} does not exist in table {}",
                column, self.table
            )));
        }
        self.cols.insert(column, value.into());
        self.touch();
        Ok(())
    }

    fn resolve_accessor(&self, name: &str) -> Result<String> {
        let schema = self.db.describe_table(&self.table)?;
        schema
            .resolve_accessor(name)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::Validation(format!(
                    "No column in table {} matches accessor {}",
                    self.table, name
                ))
            })
    }

    /// Reads a column by accessor name (`FooBar` or `fooBar` for `foo_bar`).
    pub fn get_named(&self, name: &str) -> Result<Option<&Value>> {
        let column = self.resolve_accessor(name)?;
        Ok(self.cols.get(&column))
    }

    /// Writes a column by accessor name.
    pub fn set_named(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let column = self.resolve_accessor(name)?;
        self.cols.insert(column, value.into());
        self.touch();
        Ok(())
    }

    /// Bag value, then the record's own `table` / `primary_key` properties,
    /// then `Bool(false)`.
    pub fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.cols.get(name) {
            return value.clone();
        }
        match name {
            "table" => Value::Text(self.table.clone()),
            "primary_key" => match &self.primary_key {
                PrimaryKey::None => Value::Bool(false),
                PrimaryKey::Single(column) => Value::Text(column.clone()),
                PrimaryKey::Composite(columns) => {
                    Value::List(columns.iter().cloned().map(Value::Text).collect())
                }
            },
            _ => Value::Bool(false),
        }
    }

    /// The whole bag, or just `keys` (each resolved through `lookup`).
    pub fn get_data(&self, keys: Option<&[&str]>) -> ColumnBag {
        match keys {
            None => self.cols.clone(),
            Some(keys) => keys.iter().map(|k| (k.to_string(), self.lookup(k))).collect(),
        }
    }

    /// Merges `data` into the bag. With `verify`, entries for columns the
    /// table does not have are dropped.
    pub fn add_data(&mut self, data: ColumnBag, verify: bool) -> Result<()> {
        let data = if verify {
            let schema = self.db.describe_table(&self.table)?;
            data.into_iter().filter(|(k, _)| schema.has_column(k)).collect()
        } else {
            data
        };
        self.cols.merge(data);
        self.touch();
        Ok(())
    }

    pub fn purge_data(&mut self) {
        self.cols.clear();
    }

    pub fn unset(&mut self, column: &str) -> Option<Value> {
        self.cols.remove(column)
    }

    /// None when the column is not in the bag; otherwise whether its value is
    /// non-empty.
    pub fn is_set(&self, column: &str) -> Option<bool> {
        self.cols.get(column).map(|v| !v.is_empty_like())
    }

    pub fn column_exists(&self, column: &str) -> Result<bool> {
        self.db.column_exists(&self.table, column)
    }

    pub fn get_columns(&self) -> Result<Vec<(String, bool)>> {
        self.db.get_columns(&self.table)
    }

    pub fn get_default_values(&self) -> Result<ColumnBag> {
        self.db.get_default_values(&self.table)
    }

    /// `SELECT t.* FROM `table` AS t WHERE <cond>`
    pub fn load_sql(&self, cond: &str) -> Result<String> {
        Ok(format!("SELECT t.* FROM {} AS t WHERE {}", quote_identifier(&self.table)?, cond))
    }

    fn absorb(&mut self, row: ColumnBag) {
        for (column, value) in row {
            self.cols.insert(column, value);
        }
        self.state = RecordState::Loaded;
    }

    /// Loads the first row matching `cond`. Returns whether a row was found.
    pub fn load(&mut self, cond: &str, params: &[Value]) -> Result<bool> {
        let sql = self.load_sql(cond)?;
        match self.db.executor().get_first(&sql, params)? {
            Some(row) => {
                self.absorb(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Loads the row with primary key `id`. Composite keys take a `List` with
    /// one value per key column.
    pub fn load_by_pk(&mut self, id: impl Into<Value>) -> Result<bool> {
        let id = id.into();
        let columns = self.primary_key.columns();
        if columns.is_empty() {
            return Err(GatewayError::Validation(format!(
                "Primary key not defined for table {}.",
                self.table
            )));
        }

        let params = match id {
            Value::List(items) => items,
            other => vec![other],
        };
        if params.len() != columns.len() {
            return Err(GatewayError::Validation(format!(
                "Expected {} primary key value(s) for table {}, got {}.",
                columns.len(),
                self.table,
                params.len()
            )));
        }

        let conditions = columns
            .iter()
            .map(|c| Ok(format!("{} = ?", quote_identifier(c)?)))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            quote_identifier(&self.table)?,
            conditions.join(" AND ")
        );

        match self.db.executor().get_first(&sql, &params)? {
            Some(row) => {
                self.absorb(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The primary key value(s) held in the bag.
    pub fn identity(&self) -> Option<Value> {
        match &self.primary_key {
            PrimaryKey::None => None,
            PrimaryKey::Single(column) => self.cols.get(column).cloned(),
            PrimaryKey::Composite(columns) => columns
                .iter()
                .map(|c| self.cols.get(c).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
        }
    }

    /// Writes the bag.
    ///
    /// With an `id`, updates that row (the bag's own primary key entry is
    /// dropped first when `auto_increment` is set). Without one, inserts, or
    /// upserts when `auto_increment` is false. Lists are skipped; `Null`,
    /// `""` and `false` are not written, while zero and `EmptyString` are.
    ///
    /// Returns the generated id for inserts, affected rows otherwise, and 1
    /// for an empty bag.
    pub fn save(&mut self, id: Option<Value>, auto_increment: bool) -> Result<u64> {
        if id.is_some() && auto_increment {
            for column in self.primary_key.columns() {
                self.cols.remove(column);
            }
        }

        if self.cols.is_empty() {
            return Ok(1);
        }

        let mut keys = Vec::with_capacity(self.cols.len());
        let mut vals = Vec::with_capacity(self.cols.len());
        for (column, value) in self.cols.iter() {
            if value.is_list() || !value.is_persistable() {
                continue;
            }
            keys.push(column.to_string());
            vals.push(value.clone());
        }

        let builder = self.db.builder();
        let executor = self.db.executor();
        let result = match id {
            None if !auto_increment => {
                let sql = builder.build_insert_update_query(&self.table, &keys, &vals)?;
                executor.update(&sql, &[])?
            }
            Some(id) => {
                let pri_vals = match id {
                    Value::List(items) => items,
                    other => vec![other],
                };
                let sql = builder.build_update_query(
                    &self.table,
                    &keys,
                    &vals,
                    &self.primary_key.columns(),
                    &pri_vals,
                    "",
                )?;
                executor.update(&sql, &[])?
            }
            None => {
                let sql = builder.build_insert_query(&self.table, &keys, &vals)?;
                let generated = executor.insert(&sql, &[])?;
                if generated > 0 {
                    if let Some(column) = self.primary_key.single() {
                        self.cols.insert(column.to_string(), Value::UInt(generated));
                    }
                }
                generated
            }
        };

        debug!(table = %self.table, columns = keys.len(), result, "Record saved");
        self.state = RecordState::Persisted;
        Ok(result)
    }

    /// Rows of this table matching `search`.
    pub fn find_all_by_terms(&self, search: &TermSearch) -> Result<Vec<ColumnBag>> {
        let sql = self.db.builder().build_search_query(&self.table, search)?;
        self.db.executor().get_all(&sql, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{result_set, scripted_database, users_describe};

    #[test]
    fn test_save_writes_zero_and_empty_string_sentinel() {
        let (db, script) = scripted_database();
        script.respond("DESCRIBE `users`", users_describe());
        script.set_insert_id(7);

        let mut user = db.table("users").unwrap();
        user.set("name", "x").unwrap();
        user.set("age", 0).unwrap();
        user.set("bio", Value::EmptyString).unwrap();

        assert_eq!(user.save(None, true).unwrap(), 7);
        assert_eq!(
            script.statements().last().unwrap(),
            "INSERT INTO `users` (`name`, `age`, `bio`) VALUES ('x', '0', '')"
        );
        assert_eq!(user.get("id"), Some(&Value::UInt(7)));
        assert_eq!(user.state(), RecordState::Persisted);
    }

    #[test]
    fn test_save_skips_lists_and_empty_values() {
        let (db, script) = scripted_database();
        let mut user = db.record("users", PrimaryKey::Single("id".to_string())).without_validation();
        user.set("name", "Ada").unwrap();
        user.set("tags", vec!["a", "b"]).unwrap();
        user.set("bio", "").unwrap();
        user.set("created_at", Value::Null).unwrap();
        user.set("active", false).unwrap();
        user.set("age", "0").unwrap();

        user.save(None, true).unwrap();
        assert_eq!(
            script.statements().last().unwrap(),
            "INSERT INTO `users` (`name`, `age`) VALUES ('Ada', '0')"
        );
    }

    #[test]
    fn test_save_with_id_updates_and_drops_auto_increment_key() {
        let (db, script) = scripted_database();
        script.respond(
            "SELECT * FROM `users`",
            result_set(&["id", "name"], vec![vec![Value::Int(5), Value::from("Ann")]]),
        );
        let mut user = db.record("users", PrimaryKey::Single("id".to_string())).without_validation();

        assert!(user.load_by_pk(5).unwrap());
        assert_eq!(user.state(), RecordState::Loaded);
        user.set("name", "Bob").unwrap();
        assert_eq!(user.state(), RecordState::Dirty);

        assert_eq!(user.save(Some(Value::Int(5)), true).unwrap(), 1);
        let statements = script.statements();
        assert_eq!(statements[0], "SELECT * FROM `users` WHERE `id` = ? LIMIT 1");
        assert_eq!(
            statements[1],
            "UPDATE `users` SET `name` = 'Bob' WHERE `id` = '5' LIMIT 1"
        );
        assert_eq!(user.get("id"), None);
    }

    #[test]
    fn test_save_without_auto_increment_upserts() {
        let (db, script) = scripted_database();
        let mut setting = db.record("settings", PrimaryKey::Single("key".to_string())).without_validation();
        setting.set("key", "theme").unwrap();
        setting.set("value", "dark").unwrap();

        setting.save(None, false).unwrap();
        assert_eq!(
            script.statements().last().unwrap(),
            "INSERT INTO `settings` (`key`, `value`) VALUES ('theme', 'dark') ON DUPLICATE KEY UPDATE `key` = 'theme', `value` = 'dark'"
        );
    }

    #[test]
    fn test_save_empty_bag_is_noop() {
        let (db, script) = scripted_database();
        let mut user = db.record("users", PrimaryKey::Single("id".to_string()));
        assert_eq!(user.save(None, true).unwrap(), 1);
        assert!(script.statements().is_empty());
    }

    #[test]
    fn test_save_with_nothing_persistable_is_validation_error() {
        let (db, _script) = scripted_database();
        let mut user = db.record("users", PrimaryKey::Single("id".to_string())).without_validation();
        user.set("bio", "").unwrap();
        assert!(matches!(user.save(None, true), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn test_set_validates_against_schema() {
        let (db, script) = scripted_database();
        script.respond("DESCRIBE `users`", users_describe());
        let mut user = db.table("users").unwrap();

        assert!(user.set("name", "Ada").is_ok());
        match user.set("nickname", "A") {
            Err(GatewayError::Validation(msg)) => assert!(msg.contains("nickname")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
        assert_eq!(user.state(), RecordState::New);
    }

    #[test]
    fn test_named_accessors() {
        let (db, script) = scripted_database();
        script.respond("DESCRIBE `users`", users_describe());
        let mut user = db.table("users").unwrap();

        user.set_named("CreatedAt", "2024-01-01 00:00:00").unwrap();
        assert_eq!(user.get("created_at"), Some(&Value::from("2024-01-01 00:00:00")));
        assert_eq!(
            user.get_named("createdAt").unwrap(),
            Some(&Value::from("2024-01-01 00:00:00"))
        );
        assert!(matches!(user.get_named("Nickname"), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn test_lookup_and_data_helpers() {
        let (db, script) = scripted_database();
        script.respond("DESCRIBE `users`", users_describe());
        let mut user = db.table("users").unwrap();

        let mut data = ColumnBag::new();
        data.insert("name", Value::from("Ada"));
        data.insert("age", Value::Int(0));
        data.insert("__version__", Value::Int(3));
        user.add_data(data, true).unwrap();

        assert_eq!(user.lookup("name"), Value::from("Ada"));
        assert_eq!(user.lookup("table"), Value::from("users"));
        assert_eq!(user.lookup("primary_key"), Value::from("id"));
        assert_eq!(user.lookup("__version__"), Value::Bool(false));

        assert_eq!(user.is_set("name"), Some(true));
        assert_eq!(user.is_set("age"), Some(false));
        assert_eq!(user.is_set("bio"), None);

        let subset = user.get_data(Some(&["name", "bio"][..]));
        assert_eq!(subset.get("name"), Some(&Value::from("Ada")));
        assert_eq!(subset.get("bio"), Some(&Value::Bool(false)));

        assert_eq!(user.unset("age"), Some(Value::Int(0)));
        user.purge_data();
        assert!(user.get_data(None).is_empty());
    }

    #[test]
    fn test_load_by_condition_and_identity() {
        let (db, script) = scripted_database();
        script.respond(
            "SELECT t.*",
            result_set(
                &["user_id", "group_id", "role"],
                vec![vec![Value::Int(1), Value::Int(2), Value::from("admin")]],
            ),
        );
        let key = PrimaryKey::Composite(vec!["user_id".to_string(), "group_id".to_string()]);
        let mut membership = db.record("memberships", key);

        assert!(membership.load("t.role = ?", &[Value::from("admin")]).unwrap());
        assert_eq!(
            script.statements()[0],
            "SELECT t.* FROM `memberships` AS t WHERE t.role = ?"
        );
        assert_eq!(
            membership.identity(),
            Some(Value::List(vec![Value::Int(1), Value::Int(2)]))
        );

        script.clear_responses();
        assert!(!membership.load("t.role = ?", &[Value::from("guest")]).unwrap());
    }

    #[test]
    fn test_load_by_composite_pk() {
        let (db, script) = scripted_database();
        let key = PrimaryKey::Composite(vec!["user_id".to_string(), "group_id".to_string()]);
        let mut membership = db.record("memberships", key);

        assert!(!membership.load_by_pk(vec![1, 2]).unwrap());
        assert_eq!(
            script.executed()[0],
            (
                "SELECT * FROM `memberships` WHERE `user_id` = ? AND `group_id` = ? LIMIT 1".to_string(),
                vec![Value::Int(1), Value::Int(2)]
            )
        );
        assert!(matches!(membership.load_by_pk(1), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn test_find_all_by_terms() {
        let (db, script) = scripted_database();
        script.respond(
            "SELECT `id`, `name`",
            result_set(&["id", "name"], vec![vec![Value::Int(3), Value::from("Anna")]]),
        );
        let people = db.record("people", PrimaryKey::Single("id".to_string()));

        let rows = people
            .find_all_by_terms(&TermSearch::new().term("name", "ann").returning(&["id", "name"]))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("Anna")));
    }
}
