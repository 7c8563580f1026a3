//! The persisted relationship item and its serialization.
//!
//! One item exists per owner. Its existence is derived entirely from its member set:
//! an item with no members is not representable, so [`RelationshipItem::new`] refuses
//! to build one and backends delete the item when the last member is removed.

use bson::{Bson, DateTime as BsonDateTime, Document, de::deserialize_from_bson};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{RelationshipStoreError, RelationshipStoreResult};

/// Attribute name of the owner key.
pub const OWNER_ATTRIBUTE: &str = "_id";
/// Attribute name of the member set.
pub const MEMBERS_ATTRIBUTE: &str = "members";
/// Attribute name of the optional expiry timestamp.
pub const TTL_ATTRIBUTE: &str = "ttl";

/// The set of members an owner references, e.g. the accounts a user follows.
///
/// # Example
///
/// ```ignore
/// use relset_core::item::RelationshipItem;
///
/// let item = RelationshipItem::new("U1", ["F1", "F2"]).unwrap();
/// assert!(item.contains("F1"));
/// assert!(RelationshipItem::new("U1", Vec::<String>::new()).is_none());
/// ```
///
/// # Layout
///
/// Serializes as `{ _id: <owner>, members: [<member>, ...], ttl?: <datetime> }`, the
/// document shape document backends persist. `ttl` is a BSON datetime so native expiry
/// indexes can act on it. Deserialization rejects an empty member set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredItem")]
pub struct RelationshipItem {
    #[serde(rename = "_id")]
    pub owner_id: String,
    members: BTreeSet<String>,
    /// Advisory expiry. Never evaluated by the store.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ttl_datetime")]
    pub ttl: Option<DateTime<Utc>>,
}

/// Unchecked wire form of [`RelationshipItem`].
#[derive(Deserialize)]
struct StoredItem {
    #[serde(rename = "_id")]
    owner_id: String,
    #[serde(default)]
    members: BTreeSet<String>,
    #[serde(default, with = "ttl_datetime")]
    ttl: Option<DateTime<Utc>>,
}

impl TryFrom<StoredItem> for RelationshipItem {
    type Error = RelationshipStoreError;

    fn try_from(stored: StoredItem) -> Result<Self, Self::Error> {
        let owner_id = stored.owner_id;

        RelationshipItem::new(owner_id.clone(), stored.members)
            .map(|item| item.with_ttl(stored.ttl))
            .ok_or_else(|| {
                RelationshipStoreError::Serialization(format!(
                    "item for owner {owner_id} has an empty member set"
                ))
            })
    }
}

mod ttl_datetime {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        ttl: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        ttl.map(BsonDateTime::from_chrono).serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<BsonDateTime>::deserialize(deserializer)?.map(BsonDateTime::to_chrono))
    }
}

impl RelationshipItem {
    /// Builds an item, or `None` if `members` is empty.
    pub fn new<I, S>(owner_id: impl Into<String>, members: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>();

        if members.is_empty() {
            return None;
        }

        Some(Self {
            owner_id: owner_id.into(),
            members,
            ttl: None,
        })
    }

    pub fn with_ttl(mut self, ttl: Option<DateTime<Utc>>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn into_members(self) -> BTreeSet<String> {
        self.members
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always `false`: every constructor rejects an empty member set.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Inserts a member. Returns `true` if it was not already present.
    pub fn insert(&mut self, member: impl Into<String>) -> bool {
        self.members.insert(member.into())
    }

    /// Removes a member and returns the remaining item, or `None` if the set became empty.
    ///
    /// Consuming `self` makes it impossible to keep an emptied item around by accident.
    pub fn without(mut self, member: &str) -> Option<Self> {
        self.members.remove(member);

        if self.members.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// Restores an item from its stored document.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipStoreError::Serialization`] if the document is malformed or
    /// its member set is empty.
    pub fn from_document(document: Document) -> RelationshipStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, ser::serialize_to_bson};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_new_rejects_empty_members() {
        assert!(RelationshipItem::new("U1", Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_new_collapses_duplicates() {
        let item = RelationshipItem::new("U1", ["F1", "F1", "F2"]).unwrap();
        assert_eq!(item.len(), 2);
    }

    #[test]
    fn test_without_last_member_drops_item() {
        let item = RelationshipItem::new("U1", ["F1", "F2"]).unwrap();
        let item = item.without("F1").unwrap();
        assert_eq!(item.members().iter().collect::<Vec<_>>(), vec!["F2"]);
        assert!(item.without("F2").is_none());
    }

    #[test]
    fn test_stored_layout() {
        let ttl = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let item = RelationshipItem::new("U1", ["F2", "F1"])
            .unwrap()
            .with_ttl(Some(ttl));

        assert_eq!(
            serialize_to_bson(&item).unwrap(),
            Bson::Document(doc! {
                "_id": "U1",
                "members": ["F1", "F2"],
                "ttl": BsonDateTime::from_chrono(ttl),
            })
        );
    }

    #[test]
    fn test_ttl_is_omitted_when_unset() {
        let item = RelationshipItem::new("U1", ["F1"]).unwrap();
        let Bson::Document(document) = serialize_to_bson(&item).unwrap() else {
            panic!("item must serialize to a document");
        };
        assert!(!document.contains_key(TTL_ATTRIBUTE));
    }

    #[test]
    fn test_from_document_keeps_ttl() {
        let ttl = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let item = RelationshipItem::from_document(doc! {
            "_id": "U1",
            "members": ["F1"],
            "ttl": BsonDateTime::from_chrono(ttl),
        })
        .unwrap();

        assert_eq!(item.owner_id, "U1");
        assert_eq!(item.ttl, Some(ttl));
        assert!(item.contains("F1"));
    }

    #[test]
    fn test_serialized_item_restores() {
        let item = RelationshipItem::new("U1", ["F1"])
            .unwrap()
            .with_ttl(Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let Bson::Document(document) = serialize_to_bson(&item).unwrap() else {
            panic!("item must serialize to a document");
        };

        assert_eq!(RelationshipItem::from_document(document).unwrap(), item);
    }

    #[test]
    fn test_deserialize_rejects_empty_member_set() {
        let err = RelationshipItem::from_document(doc! { "_id": "U1", "members": [] }).unwrap_err();
        assert!(matches!(err, RelationshipStoreError::Serialization(_)));

        let err = RelationshipItem::from_document(doc! { "_id": "U1" }).unwrap_err();
        assert!(matches!(err, RelationshipStoreError::Serialization(_)));

        assert!(serde_json::from_value::<RelationshipItem>(json!({ "_id": "U1", "members": [] })).is_err());
    }

    #[test]
    fn test_deserialize_rejects_malformed_members() {
        let err = RelationshipItem::from_document(doc! { "_id": "U1", "members": [1, 2] }).unwrap_err();
        assert!(matches!(err, RelationshipStoreError::Serialization(_)));
    }
}
