//! Validated owner and member identifiers.
//!
//! Identifiers are opaque strings. The store does not care about their format (ULIDs,
//! UUIDs, handles); it only rejects values that no backend can key on.

use bson::Uuid;
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref};

use crate::error::{RelationshipStoreError, RelationshipStoreResult};

/// Maximum identifier length in bytes.
pub const IDENTIFIER_BYTES_MAX: usize = 1024;

/// A validated, non-empty identifier used both for owners and for members.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validates `value` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipStoreError::InvalidIdentifier`] if the value is empty, longer than
    /// [`IDENTIFIER_BYTES_MAX`] bytes, or contains control characters.
    pub fn parse(value: impl Into<String>) -> RelationshipStoreResult<Self> {
        let value = value.into();

        if value.is_empty() {
            return Err(RelationshipStoreError::invalid_identifier(value, "identifier is empty"));
        }
        if value.len() > IDENTIFIER_BYTES_MAX {
            let reason = format!(
                "identifier is {} bytes, limit is {}",
                value.len(),
                IDENTIFIER_BYTES_MAX
            );
            return Err(RelationshipStoreError::invalid_identifier(value, reason));
        }
        if value.chars().any(char::is_control) {
            return Err(RelationshipStoreError::invalid_identifier(
                value,
                "identifier contains control characters",
            ));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for Identifier {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = RelationshipStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::parse(value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = RelationshipStoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Identifier::parse(value)
    }
}

impl From<Uuid> for Identifier {
    fn from(value: Uuid) -> Self {
        // Hyphenated UUIDs are always 36 printable bytes.
        Self(value.to_string())
    }
}

impl From<uuid::Uuid> for Identifier {
    fn from(value: uuid::Uuid) -> Self {
        Self(value.hyphenated().to_string())
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}
