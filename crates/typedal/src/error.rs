//! Error types for typedal.

use thiserror::Error;

/// Errors raised while defining entities, building queries or running them.
#[derive(Debug, Error)]
pub enum TypedalError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An entity, field or relationship declaration is invalid.
    #[error("definition error: {0}")]
    Definition(String),

    /// An API was called with arguments it cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An entity was used before it was bound to a table.
    #[error("environment error: {0}")]
    Environment(String),

    /// A relationship name does not exist on the entity.
    #[error("unknown relationship `{relationship}` on `{entity}`")]
    UnknownRelationship {
        /// Entity the lookup happened on.
        entity: String,
        /// Requested relationship path.
        relationship: String,
    },

    /// No row matched where one was required.
    #[error("{0}")]
    NotFound(String),

    /// A stored value could not be read as the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    /// A cache payload could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TypedalError {
    /// The default error for `*_or_fail` terminals.
    #[must_use]
    pub fn nothing_found() -> Self {
        Self::NotFound(String::from("Nothing found!"))
    }
}

impl From<typedal_core::ValueTypeError> for TypedalError {
    fn from(err: typedal_core::ValueTypeError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for typedal operations.
pub type Result<T> = std::result::Result<T, TypedalError>;
