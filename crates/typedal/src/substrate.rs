//! The query substrate: where statements are actually executed.

use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use tracing::debug;
use typedal_core::{CreateTable, Delete, Insert, Select, SqlValue, Update};

use crate::error::{Result, TypedalError};
use crate::rows::FlatRow;

/// Executes built statements.
///
/// Selected columns come back keyed by their label (`qualifier.column`).
#[allow(async_fn_in_trait)]
pub trait Substrate {
    /// Creates a table if it does not exist yet.
    async fn create_table(&self, statement: &CreateTable) -> Result<()>;

    /// Runs a select and returns its rows.
    async fn select(&self, statement: &Select) -> Result<Vec<FlatRow>>;

    /// Runs a `COUNT` select and returns the count.
    async fn count(&self, statement: &Select) -> Result<i64>;

    /// Inserts one row and returns its id.
    async fn insert(&self, statement: Insert) -> Result<i64>;

    /// Updates rows and returns how many were affected.
    async fn update(&self, statement: Update) -> Result<u64>;

    /// Deletes rows and returns how many were affected.
    async fn delete(&self, statement: Delete) -> Result<u64>;
}

/// SQLite substrate over an `sqlx` pool.
#[derive(Debug, Clone)]
pub struct SqliteSubstrate {
    pool: SqlitePool,
}

impl SqliteSubstrate {
    /// Wraps a pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn prepare<'q>(
        sql: &'q str,
        params: Vec<SqlValue>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        debug!(sql = %sql, params = params.len(), "executing statement");
        params
            .into_iter()
            .fold(sqlx::query(sql), bind_param_raw)
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let result = Self::prepare(sql, params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

impl Substrate for SqliteSubstrate {
    async fn create_table(&self, statement: &CreateTable) -> Result<()> {
        self.execute(&statement.build(), vec![]).await?;
        Ok(())
    }

    async fn select(&self, statement: &Select) -> Result<Vec<FlatRow>> {
        let (sql, params) = statement.build();
        let rows = Self::prepare(&sql, params).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn count(&self, statement: &Select) -> Result<i64> {
        let (sql, params) = statement.build();
        let row = Self::prepare(&sql, params).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count)
    }

    async fn insert(&self, statement: Insert) -> Result<i64> {
        let (sql, params) = statement.build();
        let result = Self::prepare(&sql, params).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn update(&self, statement: Update) -> Result<u64> {
        let (sql, params) = statement.build();
        self.execute(&sql, params).await
    }

    async fn delete(&self, statement: Delete) -> Result<u64> {
        let (sql, params) = statement.build();
        self.execute(&sql, params).await
    }
}

/// Binds a SqlValue parameter to a raw query.
fn bind_param_raw<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

/// Reads every column of a row by its runtime storage class.
fn decode_row(row: &SqliteRow) -> Result<FlatRow> {
    let mut out = FlatRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get_unchecked(index)?),
                "REAL" | "NUMERIC" => SqlValue::Float(row.try_get_unchecked(index)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked(index)?),
                "TEXT" | "DATE" | "TIME" | "DATETIME" => {
                    SqlValue::Text(row.try_get_unchecked(index)?)
                }
                other => {
                    return Err(TypedalError::Decode(format!(
                        "column `{}` has unsupported storage class {other}",
                        column.name()
                    )))
                }
            }
        };
        out.insert(String::from(column.name()), value);
    }
    Ok(out)
}
