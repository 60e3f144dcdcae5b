/// Runtime Value Module
///
/// Records are schema-less: a column holds whatever scalar the database or the
/// caller put there. `Value` is that scalar, and `ColumnBag` is the ordered
/// column-to-value mapping used both for fetched rows and for record bags.
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// A runtime-typed column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Marks a column that must be written as `''` on save. A plain empty
    /// string is filtered out as "not set".
    EmptyString,
    /// A multi-valued field. Skipped on save; as a query parameter it feeds an
    /// `IN (?)` marker.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Borrowed text, for `Text` values only.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer view of numeric and numeric-looking text values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Textual form used when the value is embedded in SQL text.
    ///
    /// `Null` renders as the `NULL` keyword and the empty-string sentinel as an
    /// actual empty string. Lists have no scalar text form.
    pub fn sql_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => Some(Cow::Borrowed("NULL")),
            Value::Bool(b) => Some(Cow::Borrowed(if *b { "1" } else { "0" })),
            Value::Int(i) => Some(Cow::Owned(i.to_string())),
            Value::UInt(u) => Some(Cow::Owned(u.to_string())),
            Value::Float(f) => Some(Cow::Owned(f.to_string())),
            Value::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b)),
            Value::EmptyString => Some(Cow::Borrowed("")),
            Value::List(_) => None,
        }
    }

    /// Whether `Record::save` writes this value.
    ///
    /// Non-empty values are written, as are `"0"`, numeric zero and the
    /// empty-string sentinel. `Null`, `""`, `false` and lists are not.
    pub fn is_persistable(&self) -> bool {
        match self {
            Value::Null | Value::List(_) => false,
            Value::Bool(b) => *b,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => true,
            Value::Text(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::EmptyString => true,
        }
    }

    /// Truthiness in the loose sense used by `Record::is_set`.
    pub fn is_empty_like(&self) -> bool {
        match self {
            Value::Null | Value::EmptyString => true,
            Value::Bool(b) => !*b,
            Value::Int(i) => *i == 0,
            Value::UInt(u) => *u == 0,
            Value::Float(f) => *f == 0.0,
            Value::Text(s) => s.is_empty() || s == "0",
            Value::Bytes(b) => b.is_empty(),
            Value::List(items) => items.is_empty(),
        }
    }

    /// Total order used when sorting fetched rows in memory.
    ///
    /// Values are ranked by class first: nulls, then numbers (including
    /// numeric-looking text), then everything else by its text form.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self.sort_key(), other.sort_key()) {
            (SortKey::Null, SortKey::Null) => Ordering::Equal,
            (SortKey::Null, _) => Ordering::Less,
            (_, SortKey::Null) => Ordering::Greater,
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(&b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(&b),
        }
    }

    fn sort_key(&self) -> SortKey {
        if self.is_null() {
            return SortKey::Null;
        }
        match self.as_f64() {
            Some(n) => SortKey::Number(n),
            None => SortKey::Text(self.to_string()),
        }
    }
}

enum SortKey {
    Null,
    Number(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            other => write!(f, "{}", other.sql_text().unwrap_or_default()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::EmptyString => serializer.serialize_str(""),
            Value::List(items) => items.serialize(serializer),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(u64::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// Insertion-ordered mapping from column name to value.
///
/// Rows keep the column order of the result set and record bags keep the
/// order in which columns were touched, which is also the column order of
/// generated INSERT statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnBag {
    entries: Vec<(String, Value)>,
}

impl ColumnBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    /// Sets a column, replacing an existing value in place. Returns the
    /// previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        let column = column.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((column, value));
                None
            }
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(index).1)
    }

    /// Copies every entry of `other` into this bag.
    pub fn merge(&mut self, other: ColumnBag) {
        for (column, value) in other {
            self.insert(column, value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<(String, Value)> for ColumnBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut bag = ColumnBag::new();
        for (column, value) in iter {
            bag.insert(column, value);
        }
        bag
    }
}

impl IntoIterator for ColumnBag {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for ColumnBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (column, value) in &self.entries {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Sort direction for `sort_rows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parses `ASC`/`DESC` case-insensitively; anything else sorts ascending.
    pub fn parse(direction: &str) -> Self {
        if direction.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// Sorts fetched rows in memory by one column. Rows missing the column sort as
/// if it were NULL.
pub fn sort_rows(rows: &mut [ColumnBag], column: &str, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let left = a.get(column).unwrap_or(&Value::Null);
        let right = b.get(column).unwrap_or(&Value::Null);
        let ordering = left.compare(right);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistable_values() {
        assert!(Value::from("x").is_persistable());
        assert!(Value::from("0").is_persistable());
        assert!(Value::Int(0).is_persistable());
        assert!(Value::Float(0.0).is_persistable());
        assert!(Value::EmptyString.is_persistable());

        assert!(!Value::from("").is_persistable());
        assert!(!Value::Null.is_persistable());
        assert!(!Value::Bool(false).is_persistable());
        assert!(!Value::from(vec![1, 2]).is_persistable());
    }

    #[test]
    fn test_sql_text_rendering() {
        assert_eq!(Value::Null.sql_text().unwrap(), "NULL");
        assert_eq!(Value::EmptyString.sql_text().unwrap(), "");
        assert_eq!(Value::Int(-4).sql_text().unwrap(), "-4");
        assert_eq!(Value::Bool(true).sql_text().unwrap(), "1");
        assert!(Value::List(vec![]).sql_text().is_none());
    }

    #[test]
    fn test_column_bag_keeps_insertion_order() {
        let mut bag = ColumnBag::new();
        bag.insert("name", Value::from("x"));
        bag.insert("age", Value::Int(3));
        bag.insert("name", Value::from("y"));

        assert_eq!(bag.keys().collect::<Vec<_>>(), vec!["name", "age"]);
        assert_eq!(bag.get("name"), Some(&Value::from("y")));
        assert_eq!(bag.remove("name"), Some(Value::from("y")));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_column_bag_serializes_as_plain_json() {
        let mut bag = ColumnBag::new();
        bag.insert("id", Value::UInt(7));
        bag.insert("bio", Value::EmptyString);
        bag.insert("deleted_at", Value::Null);
        bag.insert("tags", Value::from(vec!["a", "b"]));

        let json = serde_json::to_string(&bag).unwrap();
        assert_eq!(json, r#"{"id":7,"bio":"","deleted_at":null,"tags":["a","b"]}"#);
    }

    #[test]
    fn test_sort_rows_numeric_and_direction() {
        let mut rows: Vec<ColumnBag> = [10, 2, 33]
            .iter()
            .map(|n| vec![("n".to_string(), Value::from(n.to_string()))].into_iter().collect())
            .collect();

        sort_rows(&mut rows, "n", SortDirection::Asc);
        let order: Vec<String> = rows.iter().map(|r| r.get("n").unwrap().to_string()).collect();
        assert_eq!(order, vec!["2", "10", "33"]);

        sort_rows(&mut rows, "n", SortDirection::parse("desc"));
        let order: Vec<String> = rows.iter().map(|r| r.get("n").unwrap().to_string()).collect();
        assert_eq!(order, vec!["33", "10", "2"]);
    }

    #[test]
    fn test_sort_rows_mixed_numbers_and_text() {
        let mut rows: Vec<ColumnBag> = (0..40)
            .flat_map(|n| {
                vec![
                    vec![("v".to_string(), Value::Int(n))].into_iter().collect::<ColumnBag>(),
                    vec![("v".to_string(), Value::from(format!("{}a", n)))].into_iter().collect(),
                ]
            })
            .collect();
        rows.push(vec![("v".to_string(), Value::Null)].into_iter().collect());
        rows.push(vec![("v".to_string(), Value::Float(f64::NAN))].into_iter().collect());
        rows.push(vec![("v".to_string(), Value::from("10"))].into_iter().collect());

        sort_rows(&mut rows, "v", SortDirection::Asc);

        let values: Vec<&Value> = rows.iter().map(|r| r.get("v").unwrap()).collect();
        assert_eq!(values[0], &Value::Null);
        let first_text = values.iter().position(|v| v.as_str().map_or(false, |s| s.ends_with('a'))).unwrap();
        assert!(values[1..first_text].iter().all(|v| v.as_str().map_or(true, |s| !s.ends_with('a'))));
        assert_eq!(values[first_text], &Value::from("0a"));
        assert_eq!(values.last().unwrap(), &&Value::from("9a"));

        sort_rows(&mut rows, "v", SortDirection::Desc);
        assert_eq!(rows.last().unwrap().get("v"), Some(&Value::Null));
    }

    #[test]
    fn test_option_and_vec_conversions() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(5)), Value::Int(5));
        assert_eq!(
            Value::from(vec![1, 2]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }
}
