//! SQL values and parameter handling.
//!
//! Values travel to the substrate as bound parameters, never interpolated, with
//! the exception of column defaults in `CREATE TABLE`, which use
//! [`SqlValue::to_sql_inline`].

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A SQL value that can be used as a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the SQL representation for inline use (escaped).
    ///
    /// **Warning**: Prefer using parameterized queries instead.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => {
                if *b {
                    String::from("1")
                } else {
                    String::from("0")
                }
            }
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => {
                // Escape single quotes by doubling them
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }

    /// Returns whether this is `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as an integer, if it holds one.
    ///
    /// Booleans and integral text are accepted as well, since SQLite hands
    /// booleans back as integers and aggregate columns back as text.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Encodes a list of values in the `|a|b|c|` form used for `list:*` columns.
    ///
    /// An empty list is stored as `NULL`.
    #[must_use]
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToSqlValue,
    {
        let parts: Vec<String> = items
            .into_iter()
            .map(|item| match item.to_sql_value() {
                Self::Text(s) => s.replace('|', "||"),
                other => other.to_string(),
            })
            .collect();

        if parts.is_empty() {
            Self::Null
        } else {
            Self::Text(format!("|{}|", parts.join("|")))
        }
    }

    /// Decodes a `|a|b|c|` list column into its items.
    #[must_use]
    pub fn as_list(&self) -> Vec<String> {
        let Self::Text(raw) = self else {
            return Vec::new();
        };

        let trimmed = raw.trim_matches('|');
        if trimmed.is_empty() {
            return Vec::new();
        }

        // `||` is an escaped pipe inside an item
        let placeholder = '\u{0}';
        trimmed
            .replace("||", &placeholder.to_string())
            .split('|')
            .map(|item| item.replace(placeholder, "|"))
            .collect()
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", i64::from(*b)),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for &SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self.clone()
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for &String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for NaiveDate {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d").to_string())
    }
}

impl ToSqlValue for NaiveTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%H:%M:%S").to_string())
    }
}

impl ToSqlValue for NaiveDateTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

impl ToSqlValue for DateTime<Utc> {
    fn to_sql_value(self) -> SqlValue {
        self.naive_utc().to_sql_value()
    }
}

/// Error returned when a [`SqlValue`] cannot be read as the requested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTypeError {
    /// The Rust type that was requested.
    pub expected: &'static str,
    /// Debug rendering of the value that was found.
    pub found: String,
}

impl fmt::Display for ValueTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl std::error::Error for ValueTypeError {}

/// Trait for types that can be read back from SQL values.
pub trait FromSqlValue: Sized {
    /// Converts a `SqlValue` into this type.
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError>;
}

fn mismatch<T>(expected: &'static str, value: &SqlValue) -> Result<T, ValueTypeError> {
    Err(ValueTypeError {
        expected,
        found: format!("{value:?}"),
    })
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        Ok(value.clone())
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        value.as_i64().map_or_else(|| mismatch("i64", value), Ok)
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        value
            .as_i64()
            .and_then(|n| Self::try_from(n).ok())
            .map_or_else(|| mismatch("i32", value), Ok)
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Float(x) => Ok(*x),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Int(n) => Ok(*n as Self),
            SqlValue::Text(s) => s.trim().parse().map_or_else(|_| mismatch("f64", value), Ok),
            _ => mismatch("f64", value),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(n) => Ok(*n != 0),
            SqlValue::Text(s) if s == "T" || s == "true" => Ok(true),
            SqlValue::Text(s) if s == "F" || s == "false" => Ok(false),
            _ => mismatch("bool", value),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Int(_) | SqlValue::Float(_) | SqlValue::Bool(_) => Ok(value.to_string()),
            _ => mismatch("String", value),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Blob(b) => Ok(b.clone()),
            SqlValue::Text(s) => Ok(s.clone().into_bytes()),
            _ => mismatch("Vec<u8>", value),
        }
    }
}

impl FromSqlValue for Vec<i64> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        value
            .as_list()
            .iter()
            .map(|item| item.parse().map_or_else(|_| mismatch("Vec<i64>", value), Ok))
            .collect()
    }
}

impl FromSqlValue for Vec<String> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Null => Ok(Vec::new()),
            SqlValue::Text(_) => Ok(value.as_list()),
            _ => mismatch("Vec<String>", value),
        }
    }
}

impl FromSqlValue for NaiveDate {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Text(s) => Self::parse_from_str(s, "%Y-%m-%d")
                .map_or_else(|_| mismatch("NaiveDate", value), Ok),
            _ => mismatch("NaiveDate", value),
        }
    }
}

impl FromSqlValue for NaiveTime {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Text(s) => Self::parse_from_str(s, "%H:%M:%S%.f")
                .map_or_else(|_| mismatch("NaiveTime", value), Ok),
            _ => mismatch("NaiveTime", value),
        }
    }
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        match value {
            SqlValue::Text(s) => Self::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| Self::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .map_or_else(|_| mismatch("NaiveDateTime", value), Ok),
            _ => mismatch("NaiveDateTime", value),
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        NaiveDateTime::from_sql_value(value).map(|naive| naive.and_utc())
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueTypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_sql_value(value).map(Some)
        }
    }
}
