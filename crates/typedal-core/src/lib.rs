//! # typedal-core
//!
//! The SQL layer underneath `typedal`: values, column and table references, a
//! predicate tree and statement builders. Nothing here performs I/O.
//!
//! All values are bound as parameters:
//!
//! ```rust
//! use typedal_core::{Select, TableRef, SqlValue};
//!
//! let person = TableRef::new("person");
//! let (sql, params) = Select::from(person.clone())
//!     .columns(vec![person.id()])
//!     .where_clause(Some(person.col("name").eq("'; DROP TABLE person; --")))
//!     .build();
//!
//! assert_eq!(
//!     sql,
//!     "SELECT \"person\".\"id\" AS \"person.id\" FROM \"person\" WHERE \"person\".\"name\" = ?"
//! );
//! assert_eq!(params, vec![SqlValue::Text(String::from("'; DROP TABLE person; --"))]);
//! ```

pub mod ddl;
pub mod dml;
pub mod expr;
pub mod select;
pub mod table;
pub mod value;

pub use ddl::{ColumnDef, CreateTable};
pub use dml::{Delete, Insert, Update};
pub use expr::{col, quote_ident, BinaryOp, ColumnRef, Expr, IntoExpr};
pub use select::{Count, Join, JoinKind, OrderTerm, Select};
pub use table::TableRef;
pub use value::{FromSqlValue, SqlValue, ToSqlValue, ValueTypeError};
