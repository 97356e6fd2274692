//! Relationship descriptors and relationship inference.
//!
//! A [`Relationship`] describes how to reach related rows from an owner row:
//! the target table, whether one or many rows come back, and either a
//! `condition` (owner, target) -> predicate or an explicit `on` clause that
//! produces its own join list (for pivot tables).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use typedal_core::{Expr, TableRef};

use crate::config::Config;
use crate::error::{Result, TypedalError};
use crate::fields::{Field, FieldType};

/// How a relationship is joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMethod {
    /// Keep owner rows without a match.
    Left,
    /// Drop owner rows without a match.
    Inner,
}

/// Whether a relationship yields one row or a list of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// A single related row (or none).
    One,
    /// Zero or more related rows.
    Many,
}

/// Builds the join predicate from the owner table and the (aliased) target.
pub type Condition = Arc<dyn Fn(&TableRef, &TableRef) -> Expr + Send + Sync>;

/// Builds an explicit list of left joins from the owner table and the target.
pub type OnClause = Arc<dyn Fn(&TableRef, &TableRef) -> Vec<(TableRef, Expr)> + Send + Sync>;

/// The declared target of a relationship.
///
/// Names are converted to snake_case, so `"BlogPost"` targets `blog_post`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTarget {
    table: String,
    cardinality: Cardinality,
}

impl RelationTarget {
    /// A single related row of `name`.
    #[must_use]
    pub fn one(name: &str) -> Self {
        Self {
            table: name.to_snake_case(),
            cardinality: Cardinality::One,
        }
    }

    /// A list of related rows of `name`.
    #[must_use]
    pub fn list(name: &str) -> Self {
        Self {
            table: name.to_snake_case(),
            cardinality: Cardinality::Many,
        }
    }
}

/// A relationship descriptor.
#[derive(Clone)]
pub struct Relationship {
    target: String,
    cardinality: Cardinality,
    condition: Option<Condition>,
    on: Option<OnClause>,
    join: Option<JoinMethod>,
    condition_and: Option<Condition>,
    nested: BTreeMap<String, Relationship>,
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("target", &self.target)
            .field("cardinality", &self.cardinality)
            .field("condition", &self.condition.is_some())
            .field("on", &self.on.is_some())
            .field("join", &self.join)
            .field("condition_and", &self.condition_and.is_some())
            .field("nested", &self.nested)
            .finish()
    }
}

/// Partial update applied by [`Relationship::clone_with`].
///
/// Only the fields that are set replace the original ones; `nested` entries
/// are merged into the existing map.
#[derive(Clone, Default)]
pub struct RelationshipOverrides {
    /// Replacement join method.
    pub join: Option<JoinMethod>,
    /// Replacement condition.
    pub condition: Option<Condition>,
    /// Replacement on clause.
    pub on: Option<OnClause>,
    /// Replacement extra condition.
    pub condition_and: Option<Condition>,
    /// Nested relationships to merge in.
    pub nested: BTreeMap<String, Relationship>,
}

/// Builder for [`Relationship`].
pub struct RelationshipBuilder {
    inner: Relationship,
}

impl RelationshipBuilder {
    /// Sets the join predicate.
    #[must_use]
    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> Expr + Send + Sync + 'static,
    {
        self.inner.condition = Some(Arc::new(f));
        self
    }

    /// Sets an explicit join list; such relationships are always left joined.
    #[must_use]
    pub fn on<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> Vec<(TableRef, Expr)> + Send + Sync + 'static,
    {
        self.inner.on = Some(Arc::new(f));
        self
    }

    /// Sets the join method.
    #[must_use]
    pub const fn join(mut self, method: JoinMethod) -> Self {
        self.inner.join = Some(method);
        self
    }

    /// Adds a predicate ANDed to the join condition.
    #[must_use]
    pub fn condition_and<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableRef, &TableRef) -> Expr + Send + Sync + 'static,
    {
        self.inner.condition_and = Some(Arc::new(f));
        self
    }

    /// Adds a nested relationship, joined through this one's target.
    #[must_use]
    pub fn nested(mut self, name: &str, relationship: Relationship) -> Self {
        self.inner.nested.insert(String::from(name), relationship);
        self
    }

    /// Finishes the descriptor.
    ///
    /// # Errors
    ///
    /// Fails when both a condition and an on clause were given.
    pub fn build(self) -> Result<Relationship> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl Relationship {
    /// Starts a relationship to `target`.
    #[must_use]
    pub fn builder(target: RelationTarget) -> RelationshipBuilder {
        RelationshipBuilder {
            inner: Self {
                target: target.table,
                cardinality: target.cardinality,
                condition: None,
                on: None,
                join: None,
                condition_and: None,
                nested: BTreeMap::new(),
            },
        }
    }

    /// Assembles a relationship from already shared closures.
    pub(crate) fn from_parts(
        target: &str,
        cardinality: Cardinality,
        condition: Option<Condition>,
        on: Option<OnClause>,
        join: Option<JoinMethod>,
        condition_and: Option<Condition>,
    ) -> Result<Self> {
        let relationship = Self {
            target: String::from(target),
            cardinality,
            condition,
            on,
            join,
            condition_and,
            nested: BTreeMap::new(),
        };
        relationship.validate()?;
        Ok(relationship)
    }

    fn validate(&self) -> Result<()> {
        if self.condition.is_some() && self.on.is_some() {
            return Err(TypedalError::Definition(format!(
                "relationship to `{}` can not have both a condition and an on clause",
                self.target
            )));
        }
        Ok(())
    }

    /// Returns the target table name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the cardinality.
    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Returns whether a list of rows is produced.
    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        matches!(self.cardinality, Cardinality::Many)
    }

    /// Returns the declared join method, if any.
    #[must_use]
    pub const fn join_method(&self) -> Option<JoinMethod> {
        self.join
    }

    /// Returns the join method used when planning.
    ///
    /// Relationships with an on clause are always left joined.
    #[must_use]
    pub fn resolved_join(&self, config: &Config) -> JoinMethod {
        if self.on.is_some() {
            JoinMethod::Left
        } else {
            self.join.unwrap_or(config.default_join)
        }
    }

    /// Returns the join predicate builder.
    #[must_use]
    pub const fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Returns the explicit join list builder.
    #[must_use]
    pub const fn on(&self) -> Option<&OnClause> {
        self.on.as_ref()
    }

    /// Returns the extra join predicate builder.
    #[must_use]
    pub const fn condition_and(&self) -> Option<&Condition> {
        self.condition_and.as_ref()
    }

    /// Returns the nested relationships.
    #[must_use]
    pub const fn nested(&self) -> &BTreeMap<String, Self> {
        &self.nested
    }

    pub(crate) fn nested_mut(&mut self) -> &mut BTreeMap<String, Self> {
        &mut self.nested
    }

    /// Builds the full join predicate (condition AND condition_and).
    #[must_use]
    pub fn join_condition(&self, owner: &TableRef, target: &TableRef) -> Option<Expr> {
        let condition = self.condition.as_ref().map(|f| f(owner, target))?;
        Some(match &self.condition_and {
            Some(extra) => condition.and(extra(owner, target)),
            None => condition,
        })
    }

    /// Returns a copy with the given fields overridden.
    ///
    /// # Errors
    ///
    /// Fails when the result would have both a condition and an on clause.
    pub fn clone_with(&self, overrides: RelationshipOverrides) -> Result<Self> {
        let mut nested = self.nested.clone();
        nested.extend(overrides.nested);

        let cloned = Self {
            target: self.target.clone(),
            cardinality: self.cardinality,
            condition: overrides.condition.or_else(|| self.condition.clone()),
            on: overrides.on.or_else(|| self.on.clone()),
            join: overrides.join.or(self.join),
            condition_and: overrides
                .condition_and
                .or_else(|| self.condition_and.clone()),
            nested,
        };
        cloned.validate()?;
        Ok(cloned)
    }

    /// Describes the relationship for cache keys.
    ///
    /// Closures are rendered by calling them on the unaliased tables, so two
    /// relationships describe the same way exactly when they join the same way.
    #[must_use]
    pub fn describe(&self, owner: &TableRef) -> String {
        let target = TableRef::new(&self.target);
        let condition = self
            .join_condition(owner, &target)
            .map(|expr| format!("{:?}", expr.build()))
            .unwrap_or_default();
        let on = self
            .on
            .as_ref()
            .map(|f| {
                f(owner, &target)
                    .iter()
                    .map(|(table, expr)| format!("{}:{:?}", table.to_sql(), expr.build()))
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .unwrap_or_default();
        let nested: Vec<String> = self
            .nested
            .iter()
            .map(|(name, rel)| format!("{name}({})", rel.describe(&target)))
            .collect();
        format!(
            "{}:{:?}:{:?}:{condition}:{on}:[{}]",
            self.target,
            self.cardinality,
            self.join,
            nested.join(",")
        )
    }
}

/// Infers a relationship from a reference field.
///
/// A plain reference becomes a single row, inner joined unless the field is
/// nullable; a list of references becomes a left joined list. Other field
/// types have no relationship.
#[must_use]
pub fn to_relationship(field: &Field, config: &Config) -> Option<Relationship> {
    let column = field.name.clone();
    match &field.field_type {
        FieldType::Reference(target) => {
            let join = if field.is_notnull(config) {
                JoinMethod::Inner
            } else {
                JoinMethod::Left
            };
            Relationship::builder(RelationTarget::one(target))
                .condition(move |owner, other| owner.col(&column).eq(other.id()))
                .join(join)
                .build()
                .ok()
        }
        FieldType::ListReference(target) => Relationship::builder(RelationTarget::list(target))
            .condition(move |owner, other| owner.col(&column).contains(other.id()))
            .join(JoinMethod::Left)
            .build()
            .ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldOptions;

    fn posts() -> Relationship {
        Relationship::builder(RelationTarget::list("Post"))
            .condition(|owner, other| owner.id().eq(other.col("author")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_condition_and_on_conflict() {
        let result = Relationship::builder(RelationTarget::one("tag"))
            .condition(|owner, other| owner.id().eq(other.id()))
            .on(|_, other| vec![(other.clone(), Expr::raw("1 = 1"))])
            .build();
        assert!(matches!(result, Err(TypedalError::Definition(_))));
    }

    #[test]
    fn test_target_is_snake_cased() {
        let rel = Relationship::builder(RelationTarget::list("BlogPost"))
            .build()
            .unwrap();
        assert_eq!(rel.target(), "blog_post");
        assert!(rel.is_multiple());
    }

    #[test]
    fn test_on_is_always_left() {
        let rel = Relationship::builder(RelationTarget::list("tag"))
            .on(|_, other| vec![(other.clone(), Expr::raw("1 = 1"))])
            .join(JoinMethod::Inner)
            .build()
            .unwrap();
        assert_eq!(rel.resolved_join(&Config::default()), JoinMethod::Left);
    }

    #[test]
    fn test_clone_with_overrides_only_given_fields() {
        let author = Relationship::builder(RelationTarget::one("person"))
            .condition(|owner, other| owner.col("author").eq(other.id()))
            .build()
            .unwrap();
        let base = Relationship::builder(RelationTarget::list("post"))
            .condition(|owner, other| owner.id().eq(other.col("author")))
            .join(JoinMethod::Left)
            .nested("author", author.clone())
            .build()
            .unwrap();

        let mut extra = BTreeMap::new();
        extra.insert(String::from("editor"), author);
        let cloned = base
            .clone_with(RelationshipOverrides {
                join: Some(JoinMethod::Inner),
                nested: extra,
                ..RelationshipOverrides::default()
            })
            .unwrap();

        assert_eq!(cloned.join_method(), Some(JoinMethod::Inner));
        assert!(cloned.condition().is_some());
        assert_eq!(
            cloned.nested().keys().collect::<Vec<_>>(),
            vec!["author", "editor"]
        );
        assert_eq!(base.join_method(), Some(JoinMethod::Left));
    }

    #[test]
    fn test_clone_with_conflict() {
        let on: OnClause = Arc::new(|_: &TableRef, other: &TableRef| {
            vec![(other.clone(), Expr::raw("1 = 1"))]
        });
        let result = posts().clone_with(RelationshipOverrides {
            on: Some(on),
            ..RelationshipOverrides::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_join_condition_with_extra() {
        let rel = Relationship::builder(RelationTarget::list("post"))
            .condition(|owner, other| owner.id().eq(other.col("author")))
            .condition_and(|_, other| other.col("published").eq(true))
            .build()
            .unwrap();
        let owner = TableRef::new("author");
        let target = TableRef::new("post").with_alias("rel_posts");
        let (sql, params) = rel.join_condition(&owner, &target).unwrap().build();
        assert_eq!(
            sql,
            "\"author\".\"id\" = \"rel_posts\".\"author\" AND \"rel_posts\".\"published\" = ?"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_inference() {
        let config = Config::default();

        let author = Field::new("author", FieldType::reference("person"));
        let rel = to_relationship(&author, &config).unwrap();
        assert_eq!(rel.target(), "person");
        assert_eq!(rel.cardinality(), Cardinality::One);
        assert_eq!(rel.join_method(), Some(JoinMethod::Inner));

        let mut editor = Field::new("editor", FieldType::reference("person"));
        editor.options = FieldOptions::new().optional();
        let rel = to_relationship(&editor, &config).unwrap();
        assert_eq!(rel.join_method(), Some(JoinMethod::Left));

        let tags = Field::new("tags", FieldType::list_reference("tag"));
        let rel = to_relationship(&tags, &config).unwrap();
        assert_eq!(rel.cardinality(), Cardinality::Many);
        assert_eq!(rel.join_method(), Some(JoinMethod::Left));
        let (sql, _) = rel
            .join_condition(&TableRef::new("post"), &TableRef::new("tag"))
            .unwrap()
            .build();
        assert_eq!(sql, "\"post\".\"tags\" LIKE '%|' || \"tag\".\"id\" || '|%'");

        assert!(to_relationship(&Field::new("name", FieldType::String), &config).is_none());
    }

    #[test]
    fn test_describe_is_stable() {
        let owner = TableRef::new("author");
        assert_eq!(posts().describe(&owner), posts().describe(&owner));
        let other = Relationship::builder(RelationTarget::list("post"))
            .condition(|owner, other| owner.id().eq(other.col("editor")))
            .build()
            .unwrap();
        assert_ne!(posts().describe(&owner), other.describe(&owner));
    }
}
