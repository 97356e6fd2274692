//! Entity declarations.
//!
//! An [`Entity`] is the bound description of one table: its fields, the
//! relationships reachable from it and the lifecycle hooks that run around
//! writes. Entities are declared with an [`EntityBuilder`] and become usable
//! once a [`Database`](crate::Database) has defined them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;
use tracing::warn;
use typedal_core::{ColumnRef, SqlValue, TableRef, ToSqlValue};

use crate::config::Config;
use crate::error::{Result, TypedalError};
use crate::fields::{Field, FieldOptions, FieldType};
use crate::mixins::Mixin;
use crate::relationship::{to_relationship, Relationship};

/// Column values for an insert or an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(BTreeMap<String, SqlValue>);

impl Values {
    /// Creates an empty set of values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value, builder style.
    #[must_use]
    pub fn set<T: ToSqlValue>(mut self, column: &str, value: T) -> Self {
        self.insert(column, value);
        self
    }

    /// Sets a column value.
    pub fn insert<T: ToSqlValue>(&mut self, column: &str, value: T) {
        self.0.insert(String::from(column), value.to_sql_value());
    }

    /// Returns a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    /// Returns whether a column is set.
    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Removes a column value.
    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        self.0.remove(column)
    }

    /// Iterates over `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.0.iter()
    }

    /// Returns whether no column is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, SqlValue); N]> for Values {
    fn from(pairs: [(&str, SqlValue); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (String::from(k), v))
                .collect(),
        )
    }
}

/// Runs before an insert and may change the values.
pub type BeforeInsert = Arc<dyn Fn(&mut Values) -> Result<()> + Send + Sync>;
/// Runs after an insert with the stored values and the new id.
pub type AfterInsert = Arc<dyn Fn(&Values, i64) -> Result<()> + Send + Sync>;
/// Runs before an update of the given ids and may change the values.
pub type BeforeUpdate = Arc<dyn Fn(&[i64], &mut Values) -> Result<()> + Send + Sync>;
/// Runs after an update of the given ids.
pub type AfterUpdate = Arc<dyn Fn(&[i64], &Values) -> Result<()> + Send + Sync>;
/// Runs before or after a delete of the given ids.
pub type DeleteHook = Arc<dyn Fn(&[i64]) -> Result<()> + Send + Sync>;

/// Lifecycle hooks of an entity, run in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before_insert: Vec<BeforeInsert>,
    pub(crate) after_insert: Vec<AfterInsert>,
    pub(crate) before_update: Vec<BeforeUpdate>,
    pub(crate) after_update: Vec<AfterUpdate>,
    pub(crate) before_delete: Vec<DeleteHook>,
    pub(crate) after_delete: Vec<DeleteHook>,
}

impl Hooks {
    pub(crate) fn run_before_insert(&self, values: &mut Values) -> Result<()> {
        self.before_insert.iter().try_for_each(|hook| hook(values))
    }

    pub(crate) fn run_after_insert(&self, values: &Values, id: i64) -> Result<()> {
        self.after_insert.iter().try_for_each(|hook| hook(values, id))
    }

    pub(crate) fn run_before_update(&self, ids: &[i64], values: &mut Values) -> Result<()> {
        self.before_update
            .iter()
            .try_for_each(|hook| hook(ids, values))
    }

    pub(crate) fn run_after_update(&self, ids: &[i64], values: &Values) -> Result<()> {
        self.after_update.iter().try_for_each(|hook| hook(ids, values))
    }

    pub(crate) fn run_before_delete(&self, ids: &[i64]) -> Result<()> {
        self.before_delete.iter().try_for_each(|hook| hook(ids))
    }

    pub(crate) fn run_after_delete(&self, ids: &[i64]) -> Result<()> {
        self.after_delete.iter().try_for_each(|hook| hook(ids))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_insert", &self.before_insert.len())
            .field("after_insert", &self.after_insert.len())
            .field("before_update", &self.before_update.len())
            .field("after_update", &self.after_update.len())
            .field("before_delete", &self.before_delete.len())
            .field("after_delete", &self.after_delete.len())
            .finish()
    }
}

/// A bound entity: one table with typed fields and relationships.
#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    fields: Vec<Field>,
    relationships: BTreeMap<String, Relationship>,
    hooks: Hooks,
}

impl Entity {
    /// Starts declaring an entity. The table name is the snake_case of `name`.
    #[must_use]
    pub fn builder(name: &str) -> EntityBuilder {
        EntityBuilder {
            name: name.to_snake_case(),
            fields: vec![],
            relationships: BTreeMap::new(),
            mixins: vec![],
            hooks: Hooks::default(),
        }
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns an unaliased handle on the table.
    #[must_use]
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.name)
    }

    /// Returns a column of the table, qualified with the table name.
    #[must_use]
    pub fn col(&self, name: &str) -> ColumnRef {
        ColumnRef::qualified(&self.name, name)
    }

    /// Returns the primary key column.
    #[must_use]
    pub fn id(&self) -> ColumnRef {
        self.col("id")
    }

    /// Returns the declared fields, without `id`.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns whether `name` is a column of this table (including `id`).
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        name == "id" || self.field(name).is_some()
    }

    /// Returns all column names, `id` first.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once("id")
            .chain(self.fields.iter().map(|f| f.name.as_str()))
            .collect()
    }

    /// Returns every column of `table`, which must be a handle on this entity.
    #[must_use]
    pub fn all_columns(&self, table: &TableRef) -> Vec<ColumnRef> {
        self.column_names()
            .into_iter()
            .map(|name| table.col(name))
            .collect()
    }

    /// Returns the relationships by name.
    #[must_use]
    pub const fn relationships(&self) -> &BTreeMap<String, Relationship> {
        &self.relationships
    }

    /// Returns one relationship.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    /// Returns the lifecycle hooks.
    #[must_use]
    pub const fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Fills in defaults for fields missing from `values`.
    pub(crate) fn apply_defaults(&self, values: &mut Values) {
        for field in &self.fields {
            if let Some(default) = &field.options.default {
                if !values.contains(&field.name) {
                    values.insert(&field.name, default.clone());
                }
            }
        }
    }

    /// Rejects columns that do not exist on the table.
    pub(crate) fn check_columns(&self, values: &Values) -> Result<()> {
        match values.iter().find(|(column, _)| !self.has_column(column)) {
            Some((column, _)) => Err(TypedalError::InvalidArgument(format!(
                "`{}` has no field `{column}`",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

/// Declares an [`Entity`].
pub struct EntityBuilder {
    name: String,
    fields: Vec<Field>,
    relationships: BTreeMap<String, Relationship>,
    mixins: Vec<Box<dyn Mixin>>,
    hooks: Hooks,
}

impl EntityBuilder {
    /// Returns the table name being declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether a field has been declared.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Adds a field with default options.
    #[must_use]
    pub fn field(self, name: &str, field_type: FieldType) -> Self {
        self.field_with(name, field_type, FieldOptions::new())
    }

    /// Adds a field.
    #[must_use]
    pub fn field_with(mut self, name: &str, field_type: FieldType, options: FieldOptions) -> Self {
        self.fields.push(Field {
            name: String::from(name),
            field_type,
            options,
        });
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, name: &str, relationship: Relationship) -> Self {
        self.relationships
            .insert(String::from(name), relationship);
        self
    }

    /// Adds a mixin, applied when the entity is built.
    #[must_use]
    pub fn mixin(mut self, mixin: impl Mixin + 'static) -> Self {
        self.mixins.push(Box::new(mixin));
        self
    }

    /// Adds a before-insert hook.
    #[must_use]
    pub fn before_insert<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Values) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_insert.push(Arc::new(f));
        self
    }

    /// Adds an after-insert hook.
    #[must_use]
    pub fn after_insert<F>(mut self, f: F) -> Self
    where
        F: Fn(&Values, i64) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.after_insert.push(Arc::new(f));
        self
    }

    /// Adds a before-update hook.
    #[must_use]
    pub fn before_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&[i64], &mut Values) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_update.push(Arc::new(f));
        self
    }

    /// Adds an after-update hook.
    #[must_use]
    pub fn after_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&[i64], &Values) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.after_update.push(Arc::new(f));
        self
    }

    /// Adds a before-delete hook.
    #[must_use]
    pub fn before_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&[i64]) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_delete.push(Arc::new(f));
        self
    }

    /// Adds an after-delete hook.
    #[must_use]
    pub fn after_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&[i64]) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.after_delete.push(Arc::new(f));
        self
    }

    /// Validates the declaration and produces the entity.
    ///
    /// Mixins are applied first. Reference fields without an explicitly
    /// declared relationship of the same name get an inferred one.
    ///
    /// # Errors
    ///
    /// Returns a definition error for an unsupported field shape, a duplicate
    /// or reserved field name, or a mixin that is missing configuration.
    pub fn build(mut self, config: &Config) -> Result<Entity> {
        let mixins = std::mem::take(&mut self.mixins);
        for mixin in &mixins {
            self = mixin.apply(self)?;
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if field.name == "id" {
                return Err(TypedalError::Definition(format!(
                    "`{}`: `id` is the implicit primary key and can not be declared",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(TypedalError::Definition(format!(
                    "`{}`: field `{}` is declared twice",
                    self.name, field.name
                )));
            }
            field.field_type.validate()?;
        }

        let mut relationships = self.relationships;
        for field in &self.fields {
            if field.field_type.target().is_none() || relationships.contains_key(&field.name) {
                continue;
            }
            match to_relationship(field, config) {
                Some(relationship) => {
                    relationships.insert(field.name.clone(), relationship);
                }
                None => warn!(
                    entity = %self.name,
                    field = %field.name,
                    "could not infer a relationship, continuing without one"
                ),
            }
        }

        Ok(Entity {
            name: self.name,
            fields: self.fields,
            relationships,
            hooks: self.hooks,
        })
    }
}
