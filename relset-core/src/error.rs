//! Error types and result types for relationship store operations.
//!
//! Every fallible operation in this crate returns [`RelationshipStoreResult<T>`].
//! Guard rejections ([`RelationshipStoreError::CapacityExceeded`],
//! [`RelationshipStoreError::NotFound`]) and validation failures are deterministic and
//! must not be retried. Transport failures report themselves through
//! [`RelationshipStoreError::is_retriable`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a relationship store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationshipStoreError {
    /// A capacity guard rejected an add. Nothing was written.
    #[error("Owner {owner} already holds the maximum of {max_size} members")]
    CapacityExceeded { owner: String, max_size: usize },
    /// An existence guard rejected a mutation because the member (or the whole item) is absent.
    /// Nothing was written.
    #[error("Member {member} not found for owner {owner}")]
    NotFound { owner: String, member: String },
    /// An operation that never creates items targeted an owner without members.
    #[error("No relationship item exists for owner {owner}")]
    ItemNotFound { owner: String },
    /// An owner or member identifier is malformed. Raised before any backend call.
    #[error("Invalid identifier {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: String },
    /// The backend could not be reached or timed out.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The backend rejected the request because of rate limiting.
    #[error("Backend throttled the request: {0}")]
    Throttled(String),
    /// A multi-step operation kept observing concurrent changes to the same owner.
    #[error("Owner {owner} changed concurrently during {attempts} attempts")]
    Contended { owner: String, attempts: u32 },
    /// Serialization/deserialization error when converting between item formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// Store configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Any other error reported by the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for relationship store operations.
pub type RelationshipStoreResult<T> = Result<T, RelationshipStoreError>;

impl RelationshipStoreError {
    pub fn invalid_identifier(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for transient infrastructure failures that a caller may retry with backoff.
    ///
    /// Guard and validation failures always return `false`: retrying them cannot change the outcome.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Throttled(_) | Self::Contended { .. }
        )
    }
}

impl From<BsonError> for RelationshipStoreError {
    fn from(err: BsonError) -> Self {
        RelationshipStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for RelationshipStoreError {
    fn from(err: SerdeJsonError) -> Self {
        RelationshipStoreError::Serialization(err.to_string())
    }
}
