/// SQL Builder Module
///
/// Pure text synthesis for the statements the record gateway needs: INSERT,
/// upsert, REPLACE and identity-scoped UPDATE, plus rewrites of existing
/// SELECT statements (count, sort, limit, extra LIKE conditions). Values are
/// classified and quoted by `quote_vals`; escaping is delegated to an
/// `Escape` implementation so the same builder works with or without a live
/// session.
use crate::core::db::clause::{SelectStatement, UpdateStatement};
use crate::core::db::driver::escape_generic;
use crate::core::db::value::Value;
use crate::core::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// SQL functions whose calls are embedded verbatim instead of quoted.
///
/// This list is closed on purpose: anything not listed here is treated as a
/// string literal.
pub const ALLOWED_FUNCTIONS: [&str; 9] = [
    "NOW",
    "DATE_SUB",
    "DATE_ADD",
    "CEILING",
    "CEIL",
    "FLOOR",
    "ROUND",
    "AES_ENCRYPT",
    "AES_DECRYPT",
];

static HEX_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^[Xx]'(.*)'$").expect("hex literal pattern is valid"));

static QUALIFIED_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*$").expect("column pattern is valid"));

/// Escapes text for embedding between single quotes.
pub trait Escape {
    fn escape(&self, raw: &str) -> String;
}

/// Escaping without a session.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericEscape;

impl Escape for GenericEscape {
    fn escape(&self, raw: &str) -> String {
        escape_generic(raw)
    }
}

/// Backtick-quotes an identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(GatewayError::Validation("Identifier must not be empty.".to_string()));
    }
    Ok(format!("`{}`", name.replace('`', "``")))
}

fn quote_identifiers<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    names.iter().map(|n| quote_identifier(n.as_ref())).collect()
}

/// Checks builder input before any SQL is produced.
///
/// Primary keys and their values must pair up one to one, and no primary key
/// may be given without a value.
pub fn validate<S: AsRef<str>, P: AsRef<str>>(
    table: &str,
    keys: &[S],
    vals: &[Value],
    pri_keys: &[P],
    pri_vals: &[Value],
) -> Result<()> {
    if table.trim().is_empty() {
        return Err(GatewayError::Validation("Table name is undefined.".to_string()));
    }
    if keys.is_empty() {
        return Err(GatewayError::Validation(format!(
            "Column names for table {} are undefined.",
            table
        )));
    }
    if vals.is_empty() {
        return Err(GatewayError::Validation(format!(
            "Column values for table {} are undefined.",
            table
        )));
    }
    if keys.len() != vals.len() {
        return Err(GatewayError::Validation(format!(
            "Number of values does not match number of columns for table {}.",
            table
        )));
    }

    for i in 0..pri_keys.len().max(pri_vals.len()) {
        let key = pri_keys.get(i).map(|k| k.as_ref().trim()).unwrap_or("");
        let val = pri_vals.get(i);
        let has_val = val.map(|v| !v.is_null() && v.sql_text().map_or(false, |t| !t.is_empty())).unwrap_or(false);
        if has_val && key.is_empty() {
            return Err(GatewayError::Validation(format!(
                "Primary key not defined for table {}.",
                table
            )));
        }
        if !key.is_empty() && !has_val {
            return Err(GatewayError::Validation(format!(
                "Value not set for primary key: {}.",
                key
            )));
        }
    }

    Ok(())
}

/// Rewrites a SELECT into `SELECT COUNT(*) AS ct ...`.
///
/// The FROM, WHERE, GROUP BY and HAVING clauses are kept verbatim; ORDER BY
/// and LIMIT are dropped.
pub fn build_count_query(sql: &str) -> Result<String> {
    let mut statement = SelectStatement::parse(sql)?;
    statement.select = "COUNT(*) AS ct".to_string();
    statement.order_by = None;
    statement.limit = None;
    Ok(statement.to_string())
}

/// Counts the rows a SELECT would return.
///
/// Plain selects go through [`build_count_query`]. Grouped, HAVING-filtered
/// or DISTINCT selects produce one row per group, so they are wrapped in a
/// derived table instead.
pub fn build_row_count_query(sql: &str) -> Result<String> {
    let mut statement = SelectStatement::parse(sql)?;
    let distinct = statement
        .select
        .split_whitespace()
        .next()
        .map(|head| head.eq_ignore_ascii_case("DISTINCT"))
        .unwrap_or(false);
    if statement.group_by.is_none() && statement.having.is_none() && !distinct {
        return build_count_query(sql);
    }
    statement.order_by = None;
    statement.limit = None;
    Ok(format!("SELECT COUNT(*) AS ct FROM ({}) AS sub", statement))
}

/// Turns `UPDATE t SET ... WHERE cond` into `SELECT COUNT(*) FROM t WHERE
/// cond`, for checking how many rows an update would touch.
pub fn build_verify_update_query(update_sql: &str) -> Result<String> {
    let statement = UpdateStatement::parse(update_sql)?;
    Ok(match statement.where_clause {
        Some(cond) => format!("SELECT COUNT(*) FROM {} WHERE {}", statement.target, cond),
        None => format!("SELECT COUNT(*) FROM {}", statement.target),
    })
}

/// Replaces the LIMIT clause of a SELECT. `limit` may include the `LIMIT`
/// keyword; an empty limit removes the clause.
pub fn set_limit(sql: &str, limit: &str) -> Result<String> {
    let mut statement = SelectStatement::parse(sql)?;
    let limit = limit.trim();
    let body = match limit.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("LIMIT") => limit[5..].trim(),
        _ => limit,
    };
    statement.limit = if body.is_empty() { None } else { Some(body.to_string()) };
    Ok(statement.to_string())
}

/// Replaces the ORDER BY clause of a SELECT, keeping any LIMIT.
pub fn set_sort(sql: &str, column: &str) -> Result<String> {
    if column.trim().is_empty() {
        return Err(GatewayError::Validation("Sort column must not be empty.".to_string()));
    }
    let mut statement = SelectStatement::parse(sql)?;
    statement.order_by = Some(column.trim().to_string());
    Ok(statement.to_string())
}

/// Output column names of a SELECT list, minus `omit`.
pub fn get_select_columns(sql: &str, omit: &[&str]) -> Result<Vec<String>> {
    let statement = SelectStatement::parse(sql)?;
    Ok(statement
        .output_columns()
        .into_iter()
        .filter(|c| !omit.contains(&c.as_str()))
        .collect())
}

/// Options for `SqlBuilder::build_search_query`.
#[derive(Debug, Clone, PartialEq)]
pub struct TermSearch {
    /// Column → value pairs to match
    pub terms: Vec<(String, Value)>,
    /// Columns to select; empty selects `*`
    pub return_fields: Vec<String>,
    /// `=` when true, `LIKE '%value%'` when false
    pub strict: bool,
    /// Terms are AND-ed when true, OR-ed when false
    pub exclusive: bool,
    /// Adds `is_active = 1`
    pub active_only: bool,
    /// ORDER BY body; defaults to the return fields
    pub order_by: Option<String>,
}

impl Default for TermSearch {
    fn default() -> Self {
        TermSearch {
            terms: Vec::new(),
            return_fields: Vec::new(),
            strict: false,
            exclusive: true,
            active_only: false,
            order_by: None,
        }
    }
}

impl TermSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.terms.push((column.to_string(), value.into()));
        self
    }

    pub fn returning(mut self, fields: &[&str]) -> Self {
        self.return_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn active_only(mut self, active_only: bool) -> Self {
        self.active_only = active_only;
        self
    }

    pub fn order_by(mut self, order_by: &str) -> Self {
        self.order_by = Some(order_by.to_string());
        self
    }
}

/// Builds SQL text with values quoted through an `Escape` implementation.
pub struct SqlBuilder<'a> {
    escaper: &'a dyn Escape,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(escaper: &'a dyn Escape) -> Self {
        SqlBuilder { escaper }
    }

    pub fn sanitize(&self, raw: &str) -> String {
        self.escaper.escape(raw)
    }

    /// `X'<sanitized payload>'`
    pub fn hex_literal(&self, payload: &str) -> String {
        format!("X'{}'", self.sanitize(payload))
    }

    fn quote_string(&self, raw: &str) -> String {
        format!("'{}'", self.sanitize(raw))
    }

    /// Quotes one value for inline embedding.
    ///
    /// Classification order: hex literal, `NULL`, allow-listed function call,
    /// otherwise a sanitized string literal.
    pub fn quote_value(&self, value: &Value) -> Result<String> {
        let text = match value {
            Value::Null => return Ok("NULL".to_string()),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                return Ok(format!("X'{}'", hex));
            }
            Value::List(_) => {
                return Err(GatewayError::Validation(
                    "Array values cannot be embedded as a single SQL value.".to_string(),
                ))
            }
            other => other.sql_text().unwrap_or_default(),
        };

        if let Some(captures) = HEX_LITERAL.captures(&text) {
            return Ok(self.hex_literal(&captures[1]));
        }
        if text == "NULL" {
            return Ok(text.into_owned());
        }
        if let Some(paren) = text.find('(') {
            if ALLOWED_FUNCTIONS.contains(&&text[..paren]) {
                return Ok(text.into_owned());
            }
        }
        Ok(self.quote_string(&text))
    }

    pub fn quote_vals(&self, vals: &[Value]) -> Result<Vec<String>> {
        vals.iter().map(|v| self.quote_value(v)).collect()
    }

    /// `INSERT INTO `table` (`k1`, `k2`) VALUES (v1, v2)`
    pub fn build_insert_query<S: AsRef<str>>(&self, table: &str, keys: &[S], vals: &[Value]) -> Result<String> {
        validate::<S, &str>(table, keys, vals, &[], &[])?;
        let columns = quote_identifiers(keys)?;
        let vals = self.quote_vals(vals)?;
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(table)?,
            columns.join(", "),
            vals.join(", ")
        ))
    }

    /// Insert that updates every given column on a duplicate key.
    pub fn build_insert_update_query<S: AsRef<str>>(&self, table: &str, keys: &[S], vals: &[Value]) -> Result<String> {
        validate::<S, &str>(table, keys, vals, &[], &[])?;
        let columns = quote_identifiers(keys)?;
        let vals = self.quote_vals(vals)?;
        let assignments: Vec<String> = columns
            .iter()
            .zip(&vals)
            .map(|(column, val)| format!("{} = {}", column, val))
            .collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            quote_identifier(table)?,
            columns.join(", "),
            vals.join(", "),
            assignments.join(", ")
        ))
    }

    /// Same as `build_insert_query` with `REPLACE` as the verb.
    pub fn build_replace_query<S: AsRef<str>>(&self, table: &str, keys: &[S], vals: &[Value]) -> Result<String> {
        let insert = self.build_insert_query(table, keys, vals)?;
        Ok(format!("REPLACE{}", &insert["INSERT".len()..]))
    }

    /// `UPDATE `table` SET ... WHERE `pk` = 'v' ... <extra_cond> LIMIT 1`
    ///
    /// Updates are always scoped to one explicit identity.
    pub fn build_update_query<S: AsRef<str>, P: AsRef<str>>(
        &self,
        table: &str,
        keys: &[S],
        vals: &[Value],
        pri_keys: &[P],
        pri_vals: &[Value],
        extra_cond: &str,
    ) -> Result<String> {
        validate(table, keys, vals, pri_keys, pri_vals)?;
        if pri_keys.is_empty() {
            return Err(GatewayError::Validation(format!(
                "Primary key not defined for table {}.",
                table
            )));
        }

        let columns = quote_identifiers(keys)?;
        let vals = self.quote_vals(vals)?;
        let assignments: Vec<String> = columns
            .iter()
            .zip(&vals)
            .map(|(column, val)| format!("{} = {}", column, val))
            .collect();

        let mut conditions = Vec::with_capacity(pri_keys.len());
        for (key, val) in pri_keys.iter().zip(pri_vals) {
            let text = val.sql_text().unwrap_or_default();
            conditions.push(format!("{} = {}", quote_identifier(key.as_ref())?, self.quote_string(&text)));
        }

        let mut sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_identifier(table)?,
            assignments.join(", "),
            conditions.join(" AND ")
        );
        if !extra_cond.trim().is_empty() {
            sql.push(' ');
            sql.push_str(extra_cond.trim());
        }
        sql.push_str(" LIMIT 1");
        Ok(sql)
    }

    /// Adds `column LIKE '%value%'` to the WHERE clause of a SELECT.
    pub fn add_condition(&self, sql: &str, column: &str, value: &str) -> Result<String> {
        let mut statement = SelectStatement::parse(sql)?;
        let column = if QUALIFIED_COLUMN.is_match(column) {
            column.to_string()
        } else {
            quote_identifier(column)?
        };
        statement.and_where(&format!("{} LIKE '%{}%'", column, self.sanitize(value)));
        Ok(statement.to_string())
    }

    /// SELECT over `table` matching every (or any) search term.
    pub fn build_search_query(&self, table: &str, search: &TermSearch) -> Result<String> {
        let mut conditions = Vec::with_capacity(search.terms.len());
        for (column, value) in &search.terms {
            let text = value.sql_text().ok_or_else(|| {
                GatewayError::Validation(format!("Search term for {} must be a scalar.", column))
            })?;
            let column = quote_identifier(column)?;
            conditions.push(if search.strict {
                format!("{} = '{}'", column, self.sanitize(&text))
            } else {
                format!("{} LIKE '%{}%'", column, self.sanitize(&text))
            });
        }

        let mut filter = conditions.join(if search.exclusive { " AND " } else { " OR " });
        if search.active_only {
            filter = if filter.is_empty() {
                "is_active = 1".to_string()
            } else {
                format!("({}) AND is_active = 1", filter)
            };
        }

        let fields = quote_identifiers(&search.return_fields)?.join(", ");
        let mut sql = format!(
            "SELECT {} FROM {}",
            if fields.is_empty() { "*" } else { fields.as_str() },
            quote_identifier(table)?
        );
        if !filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        match search.order_by.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
            Some(order_by) => {
                sql.push_str(" ORDER BY ");
                sql.push_str(order_by);
            }
            None if !fields.is_empty() => {
                sql.push_str(" ORDER BY ");
                sql.push_str(&fields);
            }
            None => {}
        }
        Ok(sql)
    }
}
