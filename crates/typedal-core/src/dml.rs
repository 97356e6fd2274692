//! INSERT, UPDATE and DELETE statement builders.

use super::expr::{quote_ident, Expr};
use super::value::{SqlValue, ToSqlValue};

/// An INSERT statement for a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Insert {
    /// Creates an INSERT into `table`.
    #[must_use]
    pub fn into(table: &str) -> Self {
        Self {
            table: String::from(table),
            columns: vec![],
            values: vec![],
        }
    }

    /// Adds a column value.
    #[must_use]
    pub fn value<T: ToSqlValue>(mut self, column: &str, value: T) -> Self {
        self.columns.push(String::from(column));
        self.values.push(value.to_sql_value());
        self
    }

    /// Builds the SQL string and parameters.
    ///
    /// An insert without columns becomes `DEFAULT VALUES`.
    #[must_use]
    pub fn build(self) -> (String, Vec<SqlValue>) {
        let table = quote_ident(&self.table);
        if self.columns.is_empty() {
            return (format!("INSERT INTO {table} DEFAULT VALUES"), vec![]);
        }
        let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<&str> = self.values.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            cols.join(", "),
            placeholders.join(", ")
        );
        (sql, self.values)
    }
}

/// An UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    assignments: Vec<(String, SqlValue)>,
    where_clause: Option<Expr>,
}

impl Update {
    /// Creates an UPDATE of `table`.
    #[must_use]
    pub fn table(table: &str) -> Self {
        Self {
            table: String::from(table),
            assignments: vec![],
            where_clause: None,
        }
    }

    /// Adds a SET assignment.
    #[must_use]
    pub fn set<T: ToSqlValue>(mut self, column: &str, value: T) -> Self {
        self.assignments
            .push((String::from(column), value.to_sql_value()));
        self
    }

    /// Sets the WHERE clause.
    #[must_use]
    pub fn where_clause(mut self, expr: Option<Expr>) -> Self {
        self.where_clause = expr;
        self
    }

    /// Returns whether there is nothing to assign.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Builds the SQL string and parameters.
    #[must_use]
    pub fn build(self) -> (String, Vec<SqlValue>) {
        let mut params = vec![];
        let sets: Vec<String> = self
            .assignments
            .into_iter()
            .map(|(column, value)| {
                params.push(value);
                format!("{} = ?", quote_ident(&column))
            })
            .collect();

        let mut sql = format!("UPDATE {} SET {}", quote_ident(&self.table), sets.join(", "));
        if let Some(expr) = self.where_clause {
            let (where_sql, where_params) = expr.build();
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }
        (sql, params)
    }
}

/// A DELETE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    where_clause: Option<Expr>,
}

impl Delete {
    /// Creates a DELETE from `table`.
    #[must_use]
    pub fn from(table: &str) -> Self {
        Self {
            table: String::from(table),
            where_clause: None,
        }
    }

    /// Sets the WHERE clause.
    #[must_use]
    pub fn where_clause(mut self, expr: Option<Expr>) -> Self {
        self.where_clause = expr;
        self
    }

    /// Builds the SQL string and parameters.
    #[must_use]
    pub fn build(self) -> (String, Vec<SqlValue>) {
        let mut sql = format!("DELETE FROM {}", quote_ident(&self.table));
        let mut params = vec![];
        if let Some(expr) = self.where_clause {
            let (where_sql, where_params) = expr.build();
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params = where_params;
        }
        (sql, params)
    }
}
