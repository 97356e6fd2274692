//! CREATE TABLE builder.

use super::expr::quote_ident;
use super::value::SqlValue;

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// SQL type (`TEXT`, `INTEGER`, ...).
    pub sql_type: String,
    /// Adds `NOT NULL`.
    pub not_null: bool,
    /// Adds `UNIQUE`.
    pub unique: bool,
    /// Inline default value.
    pub default: Option<SqlValue>,
    /// Referenced table for foreign keys.
    pub references: Option<String>,
}

impl ColumnDef {
    /// Creates a nullable column of the given type.
    #[must_use]
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: String::from(name),
            sql_type: String::from(sql_type),
            not_null: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(ref default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql_inline());
        }
        if let Some(ref table) = self.references {
            sql.push_str(&format!(" REFERENCES {} (\"id\") ON DELETE CASCADE", quote_ident(table)));
        }
        sql
    }
}

/// A `CREATE TABLE IF NOT EXISTS` statement with an integer primary key `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    name: String,
    columns: Vec<ColumnDef>,
}

impl CreateTable {
    /// Creates the statement for `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            columns: vec![],
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Builds the SQL string.
    #[must_use]
    pub fn build(&self) -> String {
        let mut defs = vec![String::from("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT")];
        defs.extend(self.columns.iter().map(ColumnDef::to_sql));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            defs.join(", ")
        )
    }
}
