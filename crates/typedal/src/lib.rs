//! # typedal
//!
//! Typed entities, relationships and a join-aware query builder on top of an
//! SQLite connection pool.
//!
//! This crate provides:
//! - `Entity` declarations with fields, hooks and mixins
//! - `Relationship` descriptors, declared or inferred from reference fields
//! - `QueryBuilder` for immutable, chainable queries
//! - A join planner that aliases every joined relationship and keeps
//!   pagination correct when joins fan out
//! - A row assembler that folds joined rows back into nested records
//! - Optional result caching with id-based invalidation
//!
//! ## Quick Start
//!
//! ```no_run
//! use sqlx::sqlite::SqlitePoolOptions;
//! use typedal::{Config, Database, Entity, FieldType, JoinOptions, Values};
//!
//! # async fn run() -> typedal::Result<()> {
//! let pool = SqlitePoolOptions::new().connect(":memory:").await?;
//! let mut db = Database::sqlite(pool, Config::default());
//!
//! db.define(Entity::builder("Author").field("name", FieldType::String))
//!     .await?;
//! db.define(
//!     Entity::builder("Post")
//!         .field("title", FieldType::String)
//!         .field("author", FieldType::reference("author")),
//! )
//! .await?;
//!
//! let author = db.insert("author", Values::new().set("name", "Henk")).await?;
//! db.insert(
//!     "post",
//!     Values::new().set("title", "Hello").set("author", author.id()),
//! )
//! .await?;
//!
//! // every post with its author attached
//! let posts = db
//!     .table("post")?
//!     .join(&["author"], JoinOptions::default())?
//!     .orderby(&["-id"])
//!     .collect()
//!     .await?;
//!
//! for post in &posts {
//!     let author = post.one("author");
//!     println!("{:?} by {:?}", post.value("title"), author.and_then(|a| a.id()));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Pagination
//!
//! ```ignore
//! let page = db.table("author")?
//!     .join(&["posts"], JoinOptions::default())?
//!     .paginate(10, 1)
//!     .await?;
//!
//! // ten authors, however many posts each has
//! assert!(page.rows().len() <= 10);
//! let next = page.next().await?;
//! ```
//!
//! ## Caching
//!
//! With `Config::caching` set, a query marked with `.cache(...)` stores its
//! assembled result; updating or deleting a row the result
//! depends on drops the entry again.
//!
//! ```ignore
//! let authors = db.table("author")?
//!     .cache(&[], CacheOptions::default())?
//!     .collect()
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod fields;
pub mod mixins;
pub mod model;
pub mod pagination;
mod planner;
pub mod query_builder;
pub mod relationship;
pub mod rows;
pub mod substrate;

pub use cache::{CacheEntry, CacheMetadata, CacheOptions, CacheStatus, CacheStore, MemoryCache};
pub use config::Config;
pub use database::Database;
pub use entity::{Entity, EntityBuilder, Hooks, Values};
pub use error::{Result, TypedalError};
pub use fields::{Field, FieldOptions, FieldType};
pub use mixins::{find_by_slug, slugify, Mixin, Slug, Timestamps};
pub use model::Model;
pub use pagination::{PaginatedRows, Pagination};
pub use query_builder::{JoinOptions, QueryBuilder, SelectOptions, WhereArg};
pub use relationship::{
    to_relationship, Cardinality, Condition, JoinMethod, OnClause, RelationTarget, Relationship,
    RelationshipBuilder, RelationshipOverrides,
};
pub use rows::{FlatRow, Instance, Metadata, PaginationMeta, RawRecord, Record, Related, ResultSet};
pub use substrate::{SqliteSubstrate, Substrate};

// Re-export the SQL layer
pub use typedal_core::{col, ColumnRef, Expr, IntoExpr, SqlValue, TableRef};
