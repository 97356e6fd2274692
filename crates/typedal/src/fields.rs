//! Field types for entity definitions.
//!
//! A field's type is resolved once, when the entity is built, into the closed
//! [`FieldType`] enum. Reference kinds carry the target table name so that
//! relationship inference never has to look at anything but this enum.

use std::fmt;

use typedal_core::{ColumnDef, SqlValue};

use crate::config::Config;
use crate::error::{Result, TypedalError};

/// The type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Short text.
    String,
    /// Long text.
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Boolean, stored as `0`/`1`.
    Boolean,
    /// Binary data.
    Blob,
    /// Floating point number.
    Float,
    /// Fixed precision decimal.
    Decimal {
        /// Total digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time.
    DateTime,
    /// Password hash.
    Password,
    /// Uploaded file name.
    Upload,
    /// JSON document stored as text.
    Json,
    /// Foreign key to another table's `id`.
    Reference(String),
    /// List of scalars, stored as `|a|b|c|`.
    ListOf(Box<FieldType>),
    /// List of foreign keys, stored as `|1|2|3|`.
    ListReference(String),
}

impl FieldType {
    /// Creates a reference to `table`.
    #[must_use]
    pub fn reference(table: &str) -> Self {
        Self::Reference(String::from(table))
    }

    /// Creates a list of references to `table`.
    #[must_use]
    pub fn list_reference(table: &str) -> Self {
        Self::ListReference(String::from(table))
    }

    /// Creates a list of scalars.
    #[must_use]
    pub fn list_of(inner: Self) -> Self {
        Self::ListOf(Box::new(inner))
    }

    /// Parses a type string such as `"string"`, `"reference person"`,
    /// `"list:integer"` or `"decimal(10,2)"`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(target) = text.strip_prefix("reference ") {
            return Ok(Self::reference(target.trim()));
        }
        if let Some(target) = text.strip_prefix("list:reference ") {
            return Ok(Self::list_reference(target.trim()));
        }
        if let Some(inner) = text.strip_prefix("list:") {
            return Self::parse(inner).map(Self::list_of);
        }
        if let Some(args) = text
            .strip_prefix("decimal(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let parse_part = |part: Option<&str>| -> Result<u8> {
                part.and_then(|p| p.trim().parse().ok()).ok_or_else(|| {
                    TypedalError::Definition(format!("invalid decimal type `{text}`"))
                })
            };
            let mut parts = args.split(',');
            let precision = parse_part(parts.next())?;
            let scale = parse_part(parts.next())?;
            return Ok(Self::Decimal { precision, scale });
        }

        match text {
            "string" => Ok(Self::String),
            "text" => Ok(Self::Text),
            "integer" => Ok(Self::Integer),
            "bigint" => Ok(Self::BigInt),
            "boolean" => Ok(Self::Boolean),
            "blob" => Ok(Self::Blob),
            "double" | "float" => Ok(Self::Float),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "datetime" => Ok(Self::DateTime),
            "password" => Ok(Self::Password),
            "upload" => Ok(Self::Upload),
            "json" => Ok(Self::Json),
            other => Err(TypedalError::Definition(format!(
                "unsupported field type `{other}`"
            ))),
        }
    }

    /// Checks that the type has a storable shape.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Decimal { precision, scale } if scale > precision => Err(
                TypedalError::Definition(format!("decimal scale {scale} exceeds precision {precision}")),
            ),
            Self::ListOf(inner) if !inner.is_list_scalar() => Err(TypedalError::Definition(
                format!("list of `{inner}` is not supported"),
            )),
            Self::Reference(target) | Self::ListReference(target) if target.is_empty() => Err(
                TypedalError::Definition(String::from("reference without a target table")),
            ),
            _ => Ok(()),
        }
    }

    const fn is_list_scalar(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Text | Self::Integer | Self::BigInt | Self::Float
        )
    }

    /// Returns the SQLite column type.
    #[must_use]
    pub const fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::BigInt | Self::Boolean | Self::Reference(_) => "INTEGER",
            Self::Float => "REAL",
            Self::Decimal { .. } => "NUMERIC",
            Self::Blob => "BLOB",
            Self::String
            | Self::Text
            | Self::Date
            | Self::Time
            | Self::DateTime
            | Self::Password
            | Self::Upload
            | Self::Json
            | Self::ListOf(_)
            | Self::ListReference(_) => "TEXT",
        }
    }

    /// Returns the referenced table for reference kinds.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Reference(t) | Self::ListReference(t) => Some(t),
            _ => None,
        }
    }

    /// Returns whether values of this type are lists.
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::ListOf(_) | Self::ListReference(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::BigInt => write!(f, "bigint"),
            Self::Boolean => write!(f, "boolean"),
            Self::Blob => write!(f, "blob"),
            Self::Float => write!(f, "double"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::DateTime => write!(f, "datetime"),
            Self::Password => write!(f, "password"),
            Self::Upload => write!(f, "upload"),
            Self::Json => write!(f, "json"),
            Self::Reference(t) => write!(f, "reference {t}"),
            Self::ListOf(inner) => write!(f, "list:{inner}"),
            Self::ListReference(t) => write!(f, "list:reference {t}"),
        }
    }
}

/// Field options.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOptions {
    /// `NOT NULL`; `None` uses [`Config::default_notnull`].
    pub notnull: Option<bool>,
    /// Value used when an insert leaves the field out.
    pub default: Option<SqlValue>,
    /// Whether values must be unique.
    pub unique: bool,
    /// Whether the field shows up in reads meant for users.
    pub readable: bool,
    /// Whether callers may set the field directly.
    pub writable: bool,
    /// Human-readable label.
    pub label: Option<String>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            notnull: None,
            default: None,
            unique: false,
            readable: true,
            writable: true,
            label: None,
        }
    }
}

impl FieldOptions {
    /// Creates new field options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the notnull option.
    #[must_use]
    pub const fn notnull(mut self, value: bool) -> Self {
        self.notnull = Some(value);
        self
    }

    /// Shorthand for `notnull(false)`.
    #[must_use]
    pub const fn optional(self) -> Self {
        self.notnull(false)
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl typedal_core::ToSqlValue) -> Self {
        self.default = Some(value.to_sql_value());
        self
    }

    /// Sets the unique option.
    #[must_use]
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets the readable option.
    #[must_use]
    pub const fn readable(mut self, value: bool) -> Self {
        self.readable = value;
        self
    }

    /// Sets the writable option.
    #[must_use]
    pub const fn writable(mut self, value: bool) -> Self {
        self.writable = value;
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, value: impl Into<String>) -> Self {
        self.label = Some(value.into());
        self
    }
}

/// A named, typed field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Options.
    pub options: FieldOptions,
}

impl Field {
    /// Creates a field with default options.
    #[must_use]
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: String::from(name),
            field_type,
            options: FieldOptions::default(),
        }
    }

    /// Returns whether the field is `NOT NULL` under `config`.
    ///
    /// List fields are always nullable since an empty list is stored as NULL.
    #[must_use]
    pub fn is_notnull(&self, config: &Config) -> bool {
        !self.field_type.is_list() && self.options.notnull.unwrap_or(config.default_notnull)
    }

    /// Returns the column definition.
    #[must_use]
    pub fn column_def(&self, config: &Config) -> ColumnDef {
        let mut def = ColumnDef::new(&self.name, self.field_type.sql_type());
        def.not_null = self.is_notnull(config);
        def.unique = self.options.unique;
        def.default = self.options.default.clone();
        if let FieldType::Reference(target) = &self.field_type {
            def.references = Some(target.clone());
        }
        def
    }
}
