//! The query builder.
//!
//! A [`QueryBuilder`] accumulates a predicate, selected columns and options,
//! the relationships to join and metadata such as the cache policy. Every
//! chaining method consumes the builder and returns a new one; builders are
//! cheap to clone, so a shared base query can be extended in several ways.
//! Nothing touches the database until a terminal method (`collect`, `first`,
//! `count`, `update`, ...) runs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, Stream};
use heck::ToSnakeCase;
use tracing::debug;
use typedal_core::{ColumnRef, Delete, Expr, SqlValue, TableRef, Update};

use crate::cache::{self, CacheEntry, CacheMetadata, CacheOptions, CacheStatus, CacheStore};
use crate::database::Database;
use crate::entity::{Entity, Values};
use crate::error::{Result, TypedalError};
use crate::model::Model;
use crate::pagination::PaginatedRows;
use crate::planner::{parse_column, Plan, PlanInput};
use crate::relationship::{
    Cardinality, Condition, JoinMethod, OnClause, Relationship, RelationshipOverrides,
};
use crate::rows::{self, FlatRow, Instance, Metadata, PaginationMeta, ResultSet};
use crate::substrate::{SqliteSubstrate, Substrate};

/// Options of a select. Unset options keep their previous value when merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    /// Order terms: `"name"`, `"-name"`, `"table.name"` or `"<random>"`.
    pub orderby: Option<Vec<String>>,
    /// Columns to group by.
    pub groupby: Option<Vec<String>>,
    /// Condition on the groups.
    pub having: Option<Expr>,
    /// `(start, stop)` row window.
    pub limitby: Option<(u64, u64)>,
    /// `SELECT DISTINCT`.
    pub distinct: Option<bool>,
    /// Order by id when a window is requested without an order (default true).
    pub orderby_on_limitby: Option<bool>,
    /// Extra inner joins.
    pub join: Option<Vec<(TableRef, Expr)>>,
    /// Extra left joins.
    pub left: Option<Vec<(TableRef, Expr)>>,
    /// `Some(false)` skips the cache for this query.
    pub cache: Option<bool>,
}

impl SelectOptions {
    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(orderby, groupby, having, limitby, distinct, orderby_on_limitby, join, left, cache);
    }
}

/// A `where` argument.
#[derive(Clone)]
pub enum WhereArg {
    /// A ready predicate.
    Expr(Expr),
    /// Builds a predicate from the queried entity; `None` adds nothing.
    Callable(Arc<dyn Fn(&Entity) -> Option<Expr> + Send + Sync>),
    /// Equality on every given field.
    Fields(Values),
    /// The column is not null.
    Column(ColumnRef),
}

impl WhereArg {
    /// Wraps a predicate-building closure.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&Entity) -> Option<Expr> + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(f))
    }

    fn into_expr(self, entity: &Entity) -> Result<Option<Expr>> {
        match self {
            Self::Expr(expr) => Ok(Some(expr)),
            Self::Callable(f) => Ok(f(entity)),
            Self::Column(column) => Ok(Some(column.is_not_null())),
            Self::Fields(values) => {
                let mut terms = Vec::new();
                for (field, value) in values.iter() {
                    if !entity.has_column(field) {
                        return Err(TypedalError::InvalidArgument(format!(
                            "`{}` has no field `{field}`",
                            entity.name()
                        )));
                    }
                    let column = entity.col(field);
                    terms.push(match value {
                        SqlValue::Null => column.is_null(),
                        value => column.eq(value),
                    });
                }
                Ok(Expr::all(terms))
            }
        }
    }
}

impl fmt::Debug for WhereArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Self::Callable(_) => f.write_str("Callable"),
            Self::Fields(values) => f.debug_tuple("Fields").field(values).finish(),
            Self::Column(column) => f.debug_tuple("Column").field(column).finish(),
        }
    }
}

impl From<Expr> for WhereArg {
    fn from(expr: Expr) -> Self {
        Self::Expr(expr)
    }
}

impl From<Values> for WhereArg {
    fn from(values: Values) -> Self {
        Self::Fields(values)
    }
}

impl From<ColumnRef> for WhereArg {
    fn from(column: ColumnRef) -> Self {
        Self::Column(column)
    }
}

/// Overrides for [`QueryBuilder::join`].
///
/// `condition` and `on` declare an ad-hoc relationship and need exactly one
/// relationship name.
#[derive(Clone, Default)]
pub struct JoinOptions {
    /// Join method for the named relationships (and their nested ones).
    pub method: Option<JoinMethod>,
    /// Ad-hoc explicit join list.
    pub on: Option<OnClause>,
    /// Ad-hoc join predicate.
    pub condition: Option<Condition>,
    /// Predicate ANDed to the join condition.
    pub condition_and: Option<Condition>,
}

impl JoinOptions {
    /// Joins with `method`.
    #[must_use]
    pub fn method(method: JoinMethod) -> Self {
        Self {
            method: Some(method),
            ..Self::default()
        }
    }

    /// Sets an ad-hoc join predicate.
    #[must_use]
    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> Expr + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    /// Sets an ad-hoc explicit join list.
    #[must_use]
    pub fn on<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> Vec<(TableRef, Expr)> + Send + Sync + 'static,
    {
        self.on = Some(Arc::new(f));
        self
    }

    /// Sets a predicate ANDed to the join condition.
    #[must_use]
    pub fn condition_and<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> Expr + Send + Sync + 'static,
    {
        self.condition_and = Some(Arc::new(f));
        self
    }
}

/// Merges a newly requested relationship into one already joined: the new
/// descriptor wins, nested joins of both are kept.
fn merge(existing: &Relationship, mut incoming: Relationship) -> Relationship {
    for (name, old) in existing.nested() {
        let merged = match incoming.nested().get(name) {
            Some(new) => merge(old, new.clone()),
            None => old.clone(),
        };
        incoming.nested_mut().insert(name.clone(), merged);
    }
    incoming
}

/// A chainable query on one entity.
pub struct QueryBuilder<'db, S: Substrate = SqliteSubstrate> {
    db: &'db Database<S>,
    entity: Arc<Entity>,
    query: Option<Expr>,
    select_args: Vec<ColumnRef>,
    options: SelectOptions,
    relationships: BTreeMap<String, Relationship>,
    metadata: Metadata,
}

impl<S: Substrate> Clone for QueryBuilder<'_, S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            entity: Arc::clone(&self.entity),
            query: self.query.clone(),
            select_args: self.select_args.clone(),
            options: self.options.clone(),
            relationships: self.relationships.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<S: Substrate> fmt::Debug for QueryBuilder<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("entity", &self.entity.name())
            .field("query", &self.query)
            .field("select_args", &self.select_args)
            .field("options", &self.options)
            .field("relationships", &self.relationships.keys())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl<'db, S: Substrate> QueryBuilder<'db, S> {
    pub(crate) fn new(db: &'db Database<S>, entity: Arc<Entity>) -> Self {
        Self {
            db,
            entity,
            query: None,
            select_args: Vec::new(),
            options: SelectOptions::default(),
            relationships: BTreeMap::new(),
            metadata: Metadata::default(),
        }
    }

    /// Returns the queried entity.
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Returns the accumulated predicate.
    #[must_use]
    pub const fn predicate(&self) -> Option<&Expr> {
        self.query.as_ref()
    }

    /// Returns the accumulated metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the names of the joined relationships.
    pub fn relationship_names(&self) -> impl Iterator<Item = &str> {
        self.relationships.keys().map(String::as_str)
    }

    /// Narrows the query; ANDed with earlier calls.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for fields the entity lacks.
    pub fn where_(self, arg: impl Into<WhereArg>) -> Result<Self> {
        self.where_any(vec![arg.into()])
    }

    /// Narrows the query to rows matching any of `args`; the alternatives are
    /// ORed together and the result is ANDed with earlier calls.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for fields the entity lacks.
    pub fn where_any(mut self, args: Vec<WhereArg>) -> Result<Self> {
        let mut alternatives = Vec::new();
        for arg in args {
            if let Some(expr) = arg.into_expr(&self.entity)? {
                alternatives.push(expr);
            }
        }
        self.query = Expr::and_opt(self.query, Expr::any(alternatives));
        Ok(self)
    }

    /// Adds columns to select and merges `options` over the current ones.
    ///
    /// Without any column, every column of the entity is selected.
    #[must_use]
    pub fn select(mut self, columns: Vec<ColumnRef>, options: SelectOptions) -> Self {
        self.select_args.extend(columns);
        self.options.merge(options);
        self
    }

    /// Sets the order, e.g. `["-created_at", "name"]`.
    #[must_use]
    pub fn orderby(self, fields: &[&str]) -> Self {
        self.select(
            vec![],
            SelectOptions {
                orderby: Some(fields.iter().map(|f| String::from(*f)).collect()),
                ..SelectOptions::default()
            },
        )
    }

    /// Joins relationships by name; all declared ones when `names` is empty.
    ///
    /// Dotted names (`"posts.author"`) join through a relationship's target.
    ///
    /// # Errors
    ///
    /// Fails when both `condition` and `on` are given, when either is given
    /// with other than exactly one name, for unknown relationship names and
    /// for targets that are not defined.
    pub fn join(mut self, names: &[&str], options: JoinOptions) -> Result<Self> {
        if options.condition.is_some() && options.on.is_some() {
            return Err(TypedalError::InvalidArgument(String::from(
                "join accepts a condition or an on clause, not both",
            )));
        }

        if options.condition.is_some() || options.on.is_some() {
            let [name] = names else {
                return Err(TypedalError::InvalidArgument(String::from(
                    "an ad-hoc join condition needs exactly one relationship name",
                )));
            };
            let (target, cardinality) = match self.entity.relationship(name) {
                Some(declared) => (String::from(declared.target()), declared.cardinality()),
                None => (name.to_snake_case(), Cardinality::One),
            };
            if !self.db.registry().contains_key(&target) {
                return Err(TypedalError::Environment(format!(
                    "join target `{target}` is not defined"
                )));
            }
            let relationship = Relationship::from_parts(
                &target,
                cardinality,
                options.condition,
                options.on,
                options.method,
                options.condition_and,
            )?;
            self.relationships.insert(String::from(*name), relationship);
            return Ok(self);
        }

        let all: Vec<String>;
        let names: Vec<&str> = if names.is_empty() {
            all = self.entity.relationships().keys().cloned().collect();
            all.iter().map(String::as_str).collect()
        } else {
            names.to_vec()
        };

        for name in names {
            let parts: Vec<&str> = name.split('.').collect();
            let relationship = self.resolve_path(
                &self.entity,
                &parts,
                options.method,
                options.condition_and.clone(),
            )?;
            let key = String::from(parts[0]);
            let relationship = match self.relationships.get(&key) {
                Some(existing) => merge(existing, relationship),
                None => relationship,
            };
            self.relationships.insert(key, relationship);
        }
        Ok(self)
    }

    fn resolve_path(
        &self,
        entity: &Entity,
        parts: &[&str],
        method: Option<JoinMethod>,
        condition_and: Option<Condition>,
    ) -> Result<Relationship> {
        let Some((first, rest)) = parts.split_first() else {
            return Err(TypedalError::InvalidArgument(String::from(
                "empty relationship name",
            )));
        };
        let declared =
            entity
                .relationship(first)
                .ok_or_else(|| TypedalError::UnknownRelationship {
                    entity: String::from(entity.name()),
                    relationship: parts.join("."),
                })?;
        let mut relationship = declared.clone_with(RelationshipOverrides {
            join: method,
            condition_and,
            ..RelationshipOverrides::default()
        })?;

        if let Some(next) = rest.first() {
            let target = self.db.entity(relationship.target())?;
            let nested = self.resolve_path(&target, rest, method, None)?;
            let nested = match relationship.nested().get(*next) {
                Some(existing) => merge(existing, nested),
                None => nested,
            };
            relationship
                .nested_mut()
                .insert(String::from(*next), nested);
        }
        Ok(relationship)
    }

    /// Marks the result as cacheable.
    ///
    /// `dependencies` name the columns whose ids invalidate the entry
    /// (`"field"` on this entity or `"table.field"`); without any, every
    /// selected `id` does. Repeated calls accumulate dependencies.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error when both an expiry and a ttl are
    /// given.
    pub fn cache(mut self, dependencies: &[&str], options: CacheOptions) -> Result<Self> {
        cache::get_expire(options.expires_at, options.ttl, Utc::now())?;
        let meta = self
            .metadata
            .cache
            .get_or_insert_with(CacheMetadata::default);
        meta.enabled = true;
        meta.depends_on
            .extend(dependencies.iter().map(|d| String::from(*d)));
        if options.expires_at.is_some() || options.ttl.is_some() {
            meta.expires_at = options.expires_at;
            meta.ttl_seconds = options.ttl.map(|ttl| ttl.num_seconds());
        }
        Ok(self)
    }

    /// Returns the key the result is cached under.
    ///
    /// Two builders produced by the same calls share a key; any difference in
    /// predicate, columns, options, relationships or metadata changes it.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut metadata = self.metadata.clone();
        metadata.cache = metadata.cache.as_ref().map(CacheMetadata::stable);
        let owner = self.entity.table_ref();
        let relationships: Vec<String> = self
            .relationships
            .iter()
            .map(|(name, rel)| format!("{name}={}", rel.describe(&owner)))
            .collect();
        cache::hash_key([
            String::from(self.entity.name()),
            format!("{metadata:?}"),
            format!("{:?}", self.query.as_ref().map(Expr::build)),
            self.select_args
                .iter()
                .map(ColumnRef::label)
                .collect::<Vec<_>>()
                .join(","),
            format!("{:?}", self.options),
            relationships.join(";"),
        ])
    }

    fn cache_store(&self) -> Option<&'db dyn CacheStore> {
        let enabled = self
            .metadata
            .cache
            .as_ref()
            .is_some_and(|meta| meta.enabled);
        if enabled && self.options.cache != Some(false) {
            self.db.cache()
        } else {
            None
        }
    }

    fn plan(&self, add_id: bool) -> Result<Plan> {
        Plan::new(
            self.db.registry(),
            self.db.config(),
            PlanInput {
                entity: &self.entity,
                predicate: self.query.clone(),
                columns: &self.select_args,
                options: &self.options,
                relationships: &self.relationships,
                add_id,
            },
        )
    }

    async fn run_plan(&self, plan: &Plan) -> Result<(Vec<FlatRow>, Metadata)> {
        let mut metadata = self.metadata.clone();
        metadata.query = self.query.as_ref().map(|q| q.build().0);
        metadata.relationships = plan.paths();

        let ids = match plan.id_select() {
            Some(select) => {
                let label = self.entity.id().label();
                let rows = self.db.substrate().select(select).await?;
                let ids: Vec<i64> = rows
                    .iter()
                    .filter_map(|row| row.get(&label).and_then(SqlValue::as_i64))
                    .collect();
                Some(ids)
            }
            None => None,
        };

        let select = plan.finish(ids.as_deref());
        let (sql, args) = select.build();
        metadata.final_query = Some(sql);
        metadata.final_args = args;
        metadata.ids = ids;

        let rows = self.db.substrate().select(&select).await?;
        Ok((rows, metadata))
    }

    /// Runs the planned select and returns the rows without assembling them.
    ///
    /// # Errors
    ///
    /// Fails when planning or the query fails.
    pub async fn execute(&self) -> Result<Vec<FlatRow>> {
        let plan = self.plan(true)?;
        Ok(self.run_plan(&plan).await?.0)
    }

    /// Renders the select that would run, with a paginated id select inlined.
    ///
    /// # Errors
    ///
    /// Fails when planning fails.
    pub fn to_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        Ok(self.plan(true)?.to_select().build())
    }

    /// Runs the query and assembles the rows, selecting `id` as well.
    ///
    /// # Errors
    ///
    /// Fails when planning, the query or the cache payload fails.
    pub async fn collect(&self) -> Result<ResultSet> {
        self.collect_with(true).await
    }

    /// Runs the query and assembles the rows.
    ///
    /// With `add_id` false, `id` is only selected when asked for, so rows
    /// are not merged per owner.
    ///
    /// # Errors
    ///
    /// Fails when planning, the query or the cache payload fails.
    pub async fn collect_with(&self, add_id: bool) -> Result<ResultSet> {
        let store = self.cache_store();
        let key = store.map(|_| self.cache_key());

        if let (Some(store), Some(key)) = (store, &key) {
            if let Some(entry) = store.load(key) {
                debug!(entity = %self.entity.name(), key = %key, "cache hit");
                let mut set: ResultSet = serde_json::from_str(&entry.payload)?;
                let meta = set
                    .metadata_mut()
                    .cache
                    .get_or_insert_with(CacheMetadata::default);
                meta.status = Some(CacheStatus::Cached);
                meta.cached_at = Some(entry.cached_at);
                meta.expires_at = entry.expires_at;
                return Ok(set);
            }
            debug!(entity = %self.entity.name(), key = %key, "cache miss");
        }

        let plan = self.plan(add_id)?;
        let (rows, metadata) = self.run_plan(&plan).await?;
        let name = self.entity.name();
        let mut set = rows::assemble(name, name, plan.relations(), rows, metadata);

        if let (Some(store), Some(key)) = (store, key) {
            let now = Utc::now();
            let meta = set
                .metadata_mut()
                .cache
                .get_or_insert_with(CacheMetadata::default);
            let expires_at = meta.expiry(now)?;
            meta.expires_at = expires_at;
            meta.key = Some(key.clone());
            meta.status = Some(CacheStatus::Fresh);
            let depends_on = meta.depends_on.clone();

            let dependencies =
                cache::dependencies(name, plan.qualifiers(), set.all_rows(), &depends_on);
            let entry = CacheEntry {
                payload: serde_json::to_string(&set)?,
                cached_at: now,
                expires_at,
            };
            store.save(&key, &dependencies, entry);
            debug!(
                entity = %name,
                key = %key,
                dependencies = dependencies.len(),
                "stored result in cache"
            );
        }
        Ok(set)
    }

    /// Like [`collect`](Self::collect), but an empty result is an error.
    ///
    /// # Errors
    ///
    /// Returns [`TypedalError::nothing_found`] when nothing matches.
    pub async fn collect_or_fail(&self) -> Result<ResultSet> {
        let set = self.collect().await?;
        if set.is_empty() {
            return Err(TypedalError::nothing_found());
        }
        Ok(set)
    }

    /// Collects the rows as models.
    ///
    /// # Errors
    ///
    /// Fails when the query fails or a row does not fit `M`.
    pub async fn collect_as<M: Model>(&self) -> Result<Vec<M>> {
        self.collect()
            .await?
            .iter()
            .map(M::from_instance)
            .collect()
    }

    /// Returns the first matching row, if any.
    ///
    /// # Errors
    ///
    /// Fails when the query fails.
    pub async fn first(&self) -> Result<Option<Instance>> {
        let page = self.paginate(1, 1).await?;
        Ok(page.into_rows().into_iter().next())
    }

    /// Returns the first matching row, or `error` (by default
    /// [`TypedalError::nothing_found`]) when nothing matches.
    ///
    /// # Errors
    ///
    /// Fails when the query fails or nothing matches.
    pub async fn first_or_fail(&self, error: Option<TypedalError>) -> Result<Instance> {
        self.first()
            .await?
            .ok_or_else(|| error.unwrap_or_else(TypedalError::nothing_found))
    }

    /// Returns the first matching row as a model.
    ///
    /// # Errors
    ///
    /// Fails when the query fails or the row does not fit `M`.
    pub async fn first_as<M: Model>(&self) -> Result<Option<M>> {
        self.first()
            .await?
            .as_ref()
            .map(M::from_instance)
            .transpose()
    }

    /// Fetches one page of `limit` rows (all rows when `limit` is 0).
    ///
    /// # Errors
    ///
    /// Fails when a query fails.
    pub async fn paginate(&self, limit: u64, page: u64) -> Result<PaginatedRows<'db, S>> {
        let page = page.max(1);
        let offset = limit.saturating_mul(page - 1);
        let rows = self.count(true).await?;
        let total = u64::try_from(rows).unwrap_or(0);
        let max_page = if limit == 0 { 1 } else { total.div_ceil(limit) };

        let meta = PaginationMeta {
            limit,
            current_page: page,
            max_page,
            rows,
            min_max: (offset, offset.saturating_add(limit)),
        };
        let mut paged = self.clone();
        if limit > 0 {
            paged.options.limitby = Some((offset, offset.saturating_add(limit)));
        }
        paged.metadata.pagination = Some(meta);

        let set = paged.collect().await?;
        Ok(PaginatedRows::new(self.clone(), set, meta))
    }

    /// Streams the results in pages of `size`, stopping at the first empty
    /// page.
    pub fn chunk<'a>(
        &'a self,
        size: u64,
    ) -> impl Stream<Item = Result<ResultSet>> + use<'a, 'db, S> {
        stream::try_unfold(1_u64, move |page| async move {
            // an unlimited page already holds everything
            if size == 0 && page > 1 {
                return Ok::<_, TypedalError>(None);
            }
            let rows = self.paginate(size, page).await?.into_rows();
            if rows.is_empty() {
                Ok(None)
            } else {
                Ok(Some((rows, page + 1)))
            }
        })
    }

    /// Counts the matching rows.
    ///
    /// Inner joined relationships narrow the count; left joined ones never
    /// do. With `distinct`, each owner counts once.
    ///
    /// # Errors
    ///
    /// Fails when planning or the query fails.
    pub async fn count(&self, distinct: bool) -> Result<i64> {
        let plan = self.plan(true)?;
        self.db.substrate().count(&plan.count_select(distinct)).await
    }

    /// Returns whether any row matches.
    ///
    /// # Errors
    ///
    /// Fails when planning or the query fails.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count(false).await? > 0)
    }

    /// Returns the values of one column of the matching rows.
    ///
    /// # Errors
    ///
    /// Fails for unknown columns or when the query fails.
    pub async fn column(&self, field: &str) -> Result<Vec<SqlValue>> {
        let column = parse_column(&self.entity, field)?;
        let label = column.label();
        let mut plain = self.clone();
        plain.select_args = vec![column];
        plain.relationships.clear();
        let plan = plain.plan(false)?;
        let (rows, _) = plain.run_plan(&plan).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(&label).unwrap_or(SqlValue::Null))
            .collect())
    }

    async fn matching_ids(&self) -> Result<Vec<i64>> {
        let plan = self.plan(true)?;
        let label = self.entity.id().label();
        let rows = self.db.substrate().select(&plan.scope_select()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(&label).and_then(SqlValue::as_i64))
            .collect())
    }

    fn invalidate(&self, ids: &[i64]) {
        if let Some(store) = self.db.cache() {
            let removed = store.invalidate(self.entity.name(), ids);
            debug!(entity = %self.entity.name(), removed, "invalidated cache entries");
        }
    }

    /// Deletes the matching rows and returns their ids.
    ///
    /// Matching nothing is not an error: the id list is empty.
    ///
    /// # Errors
    ///
    /// Fails when a hook or the query fails.
    pub async fn delete(&self) -> Result<Vec<i64>> {
        let ids = self.matching_ids().await?;
        if ids.is_empty() {
            return Ok(ids);
        }
        let hooks = self.entity.hooks();
        hooks.run_before_delete(&ids)?;

        let statement = Delete::from(self.entity.name())
            .where_clause(Some(self.entity.id().belongs(ids.iter().copied())));
        let deleted = self.db.substrate().delete(statement).await?;
        debug!(entity = %self.entity.name(), deleted, "deleted rows");

        hooks.run_after_delete(&ids)?;
        self.invalidate(&ids);
        Ok(ids)
    }

    /// Updates the matching rows and returns their ids.
    ///
    /// Matching nothing is not an error: the id list is empty.
    ///
    /// # Errors
    ///
    /// Fails for unknown or no columns, a failing hook or a failing query.
    pub async fn update(&self, values: Values) -> Result<Vec<i64>> {
        self.entity.check_columns(&values)?;
        if values.is_empty() {
            return Err(TypedalError::InvalidArgument(String::from(
                "update needs at least one field",
            )));
        }
        let ids = self.matching_ids().await?;
        if ids.is_empty() {
            return Ok(ids);
        }
        let mut values = values;
        let hooks = self.entity.hooks();
        hooks.run_before_update(&ids, &mut values)?;

        let statement = values
            .iter()
            .fold(Update::table(self.entity.name()), |statement, (column, value)| {
                statement.set(column, value)
            })
            .where_clause(Some(self.entity.id().belongs(ids.iter().copied())));
        let updated = self.db.substrate().update(statement).await?;
        debug!(entity = %self.entity.name(), updated, "updated rows");

        hooks.run_after_update(&ids, &values)?;
        self.invalidate(&ids);
        Ok(ids)
    }
}
