//! Typed models.
//!
//! A [`Model`] ties a Rust type to an entity declaration and knows how to read
//! itself from a loaded [`Instance`], related records included.

use heck::ToSnakeCase;

use crate::entity::EntityBuilder;
use crate::error::Result;
use crate::rows::Instance;

/// A Rust type backed by an entity.
///
/// # Example
///
/// ```
/// use typedal::{Entity, EntityBuilder, FieldType, Instance, Model};
///
/// struct Person {
///     id: i64,
///     name: String,
/// }
///
/// impl Model for Person {
///     const NAME: &'static str = "Person";
///
///     fn definition() -> EntityBuilder {
///         Entity::builder(Self::NAME).field("name", FieldType::String)
///     }
///
///     fn from_instance(instance: &Instance) -> typedal::Result<Self> {
///         Ok(Self {
///             id: instance.get("id")?,
///             name: instance.get("name")?,
///         })
///     }
/// }
///
/// assert_eq!(Person::table_name(), "person");
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// Declared entity name; the table is its snake_case form.
    const NAME: &'static str;

    /// Returns the entity declaration.
    fn definition() -> EntityBuilder;

    /// Reads the model from a loaded row.
    ///
    /// # Errors
    ///
    /// Fails when a column is missing or has an incompatible type.
    fn from_instance(instance: &Instance) -> Result<Self>;

    /// Returns the table name.
    fn table_name() -> String {
        Self::NAME.to_snake_case()
    }
}
