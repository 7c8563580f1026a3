//! Store configuration.
//!
//! Backends are configured through their own builders; this covers what the store itself
//! needs: which relation it serves, how reads are served by default, and the retry policy
//! applied to transient backend failures.
//!
//! ```ignore
//! use relset_core::config::StoreConfig;
//!
//! let config = StoreConfig::from_json_str(r#"{
//!     "relation": "follows",
//!     "read_consistency": "eventual",
//!     "retry": { "max_attempts": 3, "initial_backoff_ms": 50 }
//! }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::{RelationshipStoreError, RelationshipStoreResult},
    options::ReadConsistency,
    retry::RetryPolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the relation keyspace, e.g. `"follows"`.
    pub relation: String,
    /// Consistency used by `list` and `contains` when the caller does not ask for one.
    #[serde(default)]
    pub read_consistency: ReadConsistency,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl StoreConfig {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            read_consistency: ReadConsistency::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipStoreError::Serialization`] for malformed JSON and
    /// [`RelationshipStoreError::Configuration`] for invalid values.
    pub fn from_json_str(json: &str) -> RelationshipStoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> RelationshipStoreResult<()> {
        if self.relation.trim().is_empty() {
            return Err(RelationshipStoreError::Configuration(
                "relation name must not be empty".into(),
            ));
        }
        self.retry.validate()
    }
}
