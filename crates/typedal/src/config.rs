//! Configuration passed to a [`Database`](crate::Database).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::relationship::JoinMethod;

/// Database-wide defaults.
///
/// Missing keys fall back to their defaults when loading from JSON:
///
/// ```
/// use typedal::{Config, JoinMethod};
///
/// let config = Config::from_json(r#"{ "caching": false }"#).unwrap();
/// assert!(config.default_notnull);
/// assert_eq!(config.default_join, JoinMethod::Left);
/// assert!(!config.caching);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether fields are `NOT NULL` unless stated otherwise.
    pub default_notnull: bool,
    /// Join method for relationships that leave it unspecified.
    pub default_join: JoinMethod,
    /// Whether query results may be cached and writes invalidate the cache.
    pub caching: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_notnull: true,
            default_join: JoinMethod::Left,
            caching: true,
        }
    }
}

impl Config {
    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.default_notnull);
        assert_eq!(config.default_join, JoinMethod::Left);
        assert!(config.caching);
    }

    #[test]
    fn test_from_json_partial() {
        let config = Config::from_json(r#"{ "default_notnull": false, "default_join": "inner" }"#)
            .unwrap();
        assert!(!config.default_notnull);
        assert_eq!(config.default_join, JoinMethod::Inner);
        assert!(config.caching);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(Config::from_json("{ not json").is_err());
    }
}
