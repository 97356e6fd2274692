//! The database: entity registry, substrate and cache.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;
use sqlx::SqlitePool;
use tracing::{debug, info};
use typedal_core::{CreateTable, Insert};

use crate::cache::{CacheStore, MemoryCache};
use crate::config::Config;
use crate::entity::{Entity, EntityBuilder, Values};
use crate::error::{Result, TypedalError};
use crate::model::Model;
use crate::query_builder::QueryBuilder;
use crate::rows::{Instance, ResultSet};
use crate::substrate::{SqliteSubstrate, Substrate};

/// A defined table.
#[derive(Debug, Clone)]
pub(crate) struct Registered {
    pub entity: Arc<Entity>,
    /// Rows are wrapped in instances; raw tables yield plain column maps when
    /// reached through a relationship.
    pub typed: bool,
}

pub(crate) type Registry = BTreeMap<String, Registered>;

/// Entities bound to tables of one substrate.
///
/// ```no_run
/// use sqlx::sqlite::SqlitePoolOptions;
/// use typedal::{Config, Database, Entity, FieldType, Values};
///
/// # async fn run() -> typedal::Result<()> {
/// let pool = SqlitePoolOptions::new().connect(":memory:").await?;
/// let mut db = Database::sqlite(pool, Config::default());
/// db.define(Entity::builder("Person").field("name", FieldType::String))
///     .await?;
///
/// db.insert("person", Values::new().set("name", "Henk")).await?;
/// let henk = db
///     .table("person")?
///     .where_(Values::new().set("name", "Henk"))?
///     .first()
///     .await?;
/// assert!(henk.is_some());
/// # Ok(())
/// # }
/// ```
pub struct Database<S: Substrate = SqliteSubstrate> {
    substrate: S,
    config: Config,
    registry: Registry,
    cache: Option<Arc<dyn CacheStore>>,
}

impl<S: Substrate> fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("tables", &self.registry.keys().collect::<Vec<_>>())
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Database<SqliteSubstrate> {
    /// Creates a database over an SQLite pool.
    #[must_use]
    pub fn sqlite(pool: SqlitePool, config: Config) -> Self {
        Self::new(SqliteSubstrate::new(pool), config)
    }
}

impl<S: Substrate> Database<S> {
    /// Creates a database over `substrate`.
    ///
    /// An in-memory cache is installed when `config.caching` is set.
    #[must_use]
    pub fn new(substrate: S, config: Config) -> Self {
        let cache: Option<Arc<dyn CacheStore>> = if config.caching {
            Some(Arc::new(MemoryCache::new()))
        } else {
            None
        };
        Self {
            substrate,
            config,
            registry: Registry::new(),
            cache,
        }
    }

    /// Replaces the cache store.
    #[must_use]
    pub fn with_cache(mut self, store: impl CacheStore + 'static) -> Self {
        self.cache = Some(Arc::new(store));
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the substrate.
    #[must_use]
    pub const fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Returns the cache store, if caching is enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&dyn CacheStore> {
        if self.config.caching {
            self.cache.as_deref()
        } else {
            None
        }
    }

    pub(crate) const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Binds an entity to its table, creating the table if needed.
    ///
    /// # Errors
    ///
    /// Fails when the declaration is invalid, the name is already defined or
    /// the table can not be created.
    pub async fn define(&mut self, builder: EntityBuilder) -> Result<Arc<Entity>> {
        self.bind(builder, true).await
    }

    /// Binds a table whose rows stay untyped when reached through a
    /// relationship.
    ///
    /// # Errors
    ///
    /// Same as [`Database::define`].
    pub async fn register_table(&mut self, builder: EntityBuilder) -> Result<Arc<Entity>> {
        self.bind(builder, false).await
    }

    /// Binds the entity declared by `M`.
    ///
    /// # Errors
    ///
    /// Same as [`Database::define`].
    pub async fn define_model<M: Model>(&mut self) -> Result<Arc<Entity>> {
        self.define(M::definition()).await
    }

    async fn bind(&mut self, builder: EntityBuilder, typed: bool) -> Result<Arc<Entity>> {
        let entity = builder.build(&self.config)?;
        if self.registry.contains_key(entity.name()) {
            return Err(TypedalError::Definition(format!(
                "`{}` is already defined",
                entity.name()
            )));
        }

        let statement = entity
            .fields()
            .iter()
            .fold(CreateTable::new(entity.name()), |statement, field| {
                statement.column(field.column_def(&self.config))
            });
        self.substrate.create_table(&statement).await?;

        info!(
            entity = %entity.name(),
            fields = entity.fields().len(),
            relationships = entity.relationships().len(),
            typed,
            "defined entity"
        );
        let entity = Arc::new(entity);
        self.registry.insert(
            String::from(entity.name()),
            Registered {
                entity: Arc::clone(&entity),
                typed,
            },
        );
        Ok(entity)
    }

    /// Returns a defined entity by (declared or table) name.
    ///
    /// # Errors
    ///
    /// Returns an environment error when nothing was defined under `name`.
    pub fn entity(&self, name: &str) -> Result<Arc<Entity>> {
        self.registry
            .get(&name.to_snake_case())
            .map(|registered| Arc::clone(&registered.entity))
            .ok_or_else(|| {
                TypedalError::Environment(format!(
                    "`{name}` is not defined; define it before querying"
                ))
            })
    }

    /// Starts a query on a defined table.
    ///
    /// # Errors
    ///
    /// Returns an environment error when nothing was defined under `name`.
    pub fn table(&self, name: &str) -> Result<QueryBuilder<'_, S>> {
        Ok(QueryBuilder::new(self, self.entity(name)?))
    }

    /// Starts a query on the table of `M`.
    ///
    /// # Errors
    ///
    /// Returns an environment error when `M` was not defined.
    pub fn query<M: Model>(&self) -> Result<QueryBuilder<'_, S>> {
        self.table(M::NAME)
    }

    /// Inserts a row and returns it as stored.
    ///
    /// Field defaults are filled in and before-insert hooks may change the
    /// values before they are written.
    ///
    /// # Errors
    ///
    /// Fails on unknown columns, a failing hook or a database error.
    pub async fn insert(&self, table: &str, values: Values) -> Result<Instance> {
        let entity = self.entity(table)?;
        let id = self.insert_row(&entity, values).await?;
        self.table(entity.name())?
            .where_(entity.id().eq(id))?
            .first_or_fail(None)
            .await
    }

    /// Inserts several rows and returns their ids.
    ///
    /// # Errors
    ///
    /// Same as [`Database::insert`]; rows inserted before a failure stay.
    pub async fn bulk_insert(&self, table: &str, rows: Vec<Values>) -> Result<Vec<i64>> {
        let entity = self.entity(table)?;
        let mut ids = Vec::with_capacity(rows.len());
        for values in rows {
            ids.push(self.insert_row(&entity, values).await?);
        }
        Ok(ids)
    }

    async fn insert_row(&self, entity: &Entity, mut values: Values) -> Result<i64> {
        entity.check_columns(&values)?;
        entity.apply_defaults(&mut values);
        entity.hooks().run_before_insert(&mut values)?;

        let statement = values
            .iter()
            .fold(Insert::into(entity.name()), |statement, (column, value)| {
                statement.value(column, value)
            });
        let id = self.substrate.insert(statement).await?;
        debug!(entity = %entity.name(), id, "inserted row");

        entity.hooks().run_after_insert(&values, id)?;
        Ok(id)
    }

    /// Updates the row behind `instance` and returns it as stored.
    ///
    /// # Errors
    ///
    /// Fails when the instance has no id, the row is gone or the update
    /// fails.
    pub async fn update_record(&self, instance: &Instance, values: Values) -> Result<Instance> {
        let id = record_id(instance)?;
        let entity = self.entity(instance.table())?;
        let query = self.table(entity.name())?.where_(entity.id().eq(id))?;
        if query.update(values).await?.is_empty() {
            return Err(TypedalError::nothing_found());
        }
        query.first_or_fail(None).await
    }

    /// Deletes the row behind `instance`; returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Fails when the instance has no id or the delete fails.
    pub async fn delete_record(&self, instance: &Instance) -> Result<bool> {
        let id = record_id(instance)?;
        let entity = self.entity(instance.table())?;
        let deleted = self
            .table(entity.name())?
            .where_(entity.id().eq(id))?
            .delete()
            .await?;
        Ok(!deleted.is_empty())
    }

    /// Updates every row in `rows` and returns the ids that were updated.
    ///
    /// An empty set updates nothing.
    ///
    /// # Errors
    ///
    /// Same as [`QueryBuilder::update`].
    pub async fn update_rows(&self, rows: &ResultSet, values: Values) -> Result<Vec<i64>> {
        match self.rows_query(rows)? {
            Some(query) => query.update(values).await,
            None => Ok(Vec::new()),
        }
    }

    /// Deletes every row in `rows` and returns the ids that were deleted.
    ///
    /// # Errors
    ///
    /// Same as [`QueryBuilder::delete`].
    pub async fn delete_rows(&self, rows: &ResultSet) -> Result<Vec<i64>> {
        match self.rows_query(rows)? {
            Some(query) => query.delete().await,
            None => Ok(Vec::new()),
        }
    }

    fn rows_query(&self, rows: &ResultSet) -> Result<Option<QueryBuilder<'_, S>>> {
        let Some(table) = rows.table() else {
            return Ok(None);
        };
        let entity = self.entity(table)?;
        self.table(entity.name())?
            .where_(entity.id().belongs(rows.ids()))
            .map(Some)
    }
}

fn record_id(instance: &Instance) -> Result<i64> {
    instance.id().ok_or_else(|| {
        TypedalError::InvalidArgument(format!(
            "`{}` instance was loaded without its id",
            instance.table()
        ))
    })
}
