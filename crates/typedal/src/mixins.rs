//! Reusable bundles of fields and hooks.
//!
//! A [`Mixin`] is applied to an [`EntityBuilder`] when the entity is built and
//! may add fields and lifecycle hooks, or reject the declaration.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use typedal_core::SqlValue;

use crate::database::Database;
use crate::entity::{EntityBuilder, Values};
use crate::error::{Result, TypedalError};
use crate::fields::{FieldOptions, FieldType};
use crate::query_builder::JoinOptions;
use crate::rows::Instance;
use crate::substrate::Substrate;

/// A bundle of fields and hooks applied at definition time.
pub trait Mixin {
    /// Extends the entity declaration.
    ///
    /// # Errors
    ///
    /// Returns a definition error when the mixin is misconfigured.
    fn apply(&self, builder: EntityBuilder) -> Result<EntityBuilder>;
}

/// Adds `created_at` and `updated_at`.
///
/// Both are set on insert; `updated_at` is refreshed by every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps;

impl Mixin for Timestamps {
    fn apply(&self, builder: EntityBuilder) -> Result<EntityBuilder> {
        let stamped = FieldOptions::new().writable(false);
        Ok(builder
            .field_with("created_at", FieldType::DateTime, stamped.clone())
            .field_with("updated_at", FieldType::DateTime, stamped)
            .before_insert(|values| {
                let now = Utc::now();
                for column in ["created_at", "updated_at"] {
                    if !values.contains(column) {
                        values.insert(column, now);
                    }
                }
                Ok(())
            })
            .before_update(|_, values| {
                values.insert("updated_at", Utc::now());
                Ok(())
            }))
    }
}

/// Adds a unique `slug` generated on insert from another field.
///
/// ```
/// use typedal::{Config, Entity, FieldType, Slug};
///
/// let article = Entity::builder("Article")
///     .field("title", FieldType::String)
///     .mixin(Slug::new("title").suffix_length(8))
///     .build(&Config::default())
///     .unwrap();
/// assert!(article.field("slug").is_some());
///
/// let missing = Entity::builder("Article")
///     .field("title", FieldType::String)
///     .mixin(Slug::default())
///     .build(&Config::default());
/// assert!(missing.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Slug {
    field: Option<String>,
    suffix_length: usize,
}

impl Slug {
    /// Slugs generated from `field`.
    #[must_use]
    pub fn new(field: &str) -> Self {
        Self {
            field: Some(String::from(field)),
            suffix_length: 0,
        }
    }

    /// Appends `length` random characters to every slug (0 for none).
    #[must_use]
    pub const fn suffix_length(mut self, length: usize) -> Self {
        self.suffix_length = length;
        self
    }
}

impl Mixin for Slug {
    fn apply(&self, builder: EntityBuilder) -> Result<EntityBuilder> {
        let Some(source) = self.field.clone() else {
            return Err(TypedalError::Definition(format!(
                "`{}`: the slug mixin requires a source field",
                builder.name()
            )));
        };
        if !builder.has_field(&source) {
            return Err(TypedalError::Definition(format!(
                "`{}`: slug source field `{source}` does not exist",
                builder.name()
            )));
        }

        let suffix_length = self.suffix_length;
        Ok(builder
            .field_with(
                "slug",
                FieldType::String,
                FieldOptions::new().unique(true).writable(false),
            )
            .before_insert(move |values| {
                let text = match values.get(&source) {
                    Some(SqlValue::Null) | None => {
                        return Err(TypedalError::InvalidArgument(format!(
                            "slug source field `{source}` is empty"
                        )))
                    }
                    Some(value) => value.to_string(),
                };
                let mut slug = slugify(&text)?;
                if suffix_length > 0 {
                    slug = format!("{slug}-{}", random_suffix(suffix_length));
                }
                values.insert("slug", slug);
                Ok(())
            }))
    }
}

static SEPARATORS: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+"));

/// Lowercases `text` and joins its alphanumeric runs with dashes.
///
/// # Errors
///
/// Returns an invalid-argument error when nothing slug-worthy remains.
pub fn slugify(text: &str) -> Result<String> {
    let separators = SEPARATORS
        .as_ref()
        .map_err(|e| TypedalError::Definition(format!("slug pattern: {e}")))?;
    let lowered = text.to_lowercase();
    let slug = separators.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        return Err(TypedalError::InvalidArgument(format!(
            "`{text}` can not be turned into a slug"
        )));
    }
    Ok(String::from(slug))
}

fn random_suffix(length: usize) -> String {
    let mut suffix = String::new();
    while suffix.len() < length {
        suffix.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    suffix.truncate(length);
    suffix
}

/// Finds a row by its slug, optionally with all relationships joined.
///
/// # Errors
///
/// Fails when `table` is not defined or the query fails.
pub async fn find_by_slug<S: Substrate>(
    db: &Database<S>,
    table: &str,
    slug: &str,
    join: bool,
) -> Result<Option<Instance>> {
    let mut builder = db.table(table)?.where_(Values::new().set("slug", slug))?;
    if join {
        builder = builder.join(&[], JoinOptions::default())?;
    }
    builder.first().await
}
