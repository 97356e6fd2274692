//! Table handles.

use super::expr::{quote_ident, ColumnRef};

/// A table reference, optionally renamed with an alias.
///
/// Columns obtained from an aliased handle are qualified with the alias, so
/// the same table can be joined more than once in one statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Real table name.
    pub name: String,
    /// Alias used in the statement, if any.
    pub alias: Option<String>,
}

impl TableRef {
    /// Creates an unaliased handle.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            alias: None,
        }
    }

    /// Returns the same table under an alias.
    #[must_use]
    pub fn with_alias(&self, alias: &str) -> Self {
        Self {
            name: self.name.clone(),
            alias: Some(String::from(alias)),
        }
    }

    /// Returns the name columns are qualified with: the alias or the table name.
    #[must_use]
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Returns a column of this table.
    #[must_use]
    pub fn col(&self, name: &str) -> ColumnRef {
        ColumnRef::qualified(self.qualifier(), name)
    }

    /// Returns the `id` column of this table.
    #[must_use]
    pub fn id(&self) -> ColumnRef {
        self.col("id")
    }

    /// Returns the FROM/JOIN representation.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) if alias != &self.name => {
                format!("{} AS {}", quote_ident(&self.name), quote_ident(alias))
            }
            _ => quote_ident(&self.name),
        }
    }
}
