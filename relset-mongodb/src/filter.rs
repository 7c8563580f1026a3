//! Translation of guard conditions into MongoDB query filters.
//!
//! Every guard becomes part of the filter of the single write that applies the mutation, so
//! the server evaluates it atomically with the write. A document that does not match the
//! filter is left untouched and the write reports zero matches.

use bson::{Bson, Document, doc};

use relset_core::{
    condition::{Condition, ConditionVisitor},
    error::{RelationshipStoreError, RelationshipStoreResult},
    item::{MEMBERS_ATTRIBUTE, OWNER_ATTRIBUTE},
};

/// Translates [`Condition`] trees into MongoDB filter documents over the `members` array.
pub(crate) struct MongoGuardTranslator;

impl MongoGuardTranslator {
    /// Builds the filter selecting the owner's document, restricted by `guard` when present.
    pub(crate) fn owner_filter(
        owner: &str,
        guard: Option<&Condition>,
    ) -> RelationshipStoreResult<Document> {
        let owner_filter = doc! { OWNER_ATTRIBUTE: owner };

        let Some(guard) = guard else {
            return Ok(owner_filter);
        };
        let guard_filter = MongoGuardTranslator.visit_condition(guard)?;

        Ok(doc! { "$and": [owner_filter, guard_filter] })
    }

    fn visit_all(&mut self, conditions: &[Condition]) -> RelationshipStoreResult<Vec<Document>> {
        conditions
            .iter()
            .map(|condition| self.visit_condition(condition))
            .collect()
    }
}

impl ConditionVisitor for MongoGuardTranslator {
    type Output = Document;
    type Error = RelationshipStoreError;

    fn visit_and(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error> {
        // The server rejects an empty `$and`; an empty conjunction always holds.
        if conditions.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! { "$and": self.visit_all(conditions)? })
    }

    fn visit_or(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error> {
        if conditions.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        Ok(doc! { "$or": self.visit_all(conditions)? })
    }

    fn visit_not(&mut self, condition: &Condition) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$nor": [self.visit_condition(condition)?] })
    }

    fn visit_exists(&mut self) -> Result<Self::Output, Self::Error> {
        Ok(doc! { format!("{MEMBERS_ATTRIBUTE}.0"): { "$exists": true } })
    }

    fn visit_has_member(&mut self, member: &str) -> Result<Self::Output, Self::Error> {
        Ok(doc! { MEMBERS_ATTRIBUTE: member })
    }

    fn visit_size_below(&mut self, n: usize) -> Result<Self::Output, Self::Error> {
        let bound = i64::try_from(n).map_err(|_| {
            RelationshipStoreError::Backend(format!("size bound {n} does not fit in a BSON integer"))
        })?;

        Ok(doc! {
            "$expr": {
                "$lt": [
                    { "$size": { "$ifNull": [format!("${MEMBERS_ATTRIBUTE}"), Bson::Array(vec![])] } },
                    bound,
                ],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relset_core::condition::Guard;

    fn translate(condition: &Condition) -> Document {
        MongoGuardTranslator.visit_condition(condition).unwrap()
    }

    #[test]
    fn test_has_member() {
        assert_eq!(translate(&Guard::has_member("F1")), doc! { "members": "F1" });
    }

    #[test]
    fn test_lacks_member() {
        assert_eq!(
            translate(&Guard::lacks_member("F1")),
            doc! { "$nor": [{ "members": "F1" }] }
        );
    }

    #[test]
    fn test_exists() {
        assert_eq!(
            translate(&Guard::exists()),
            doc! { "members.0": { "$exists": true } }
        );
    }

    #[test]
    fn test_size_below() {
        assert_eq!(
            translate(&Guard::size_below(5000)),
            doc! {
                "$expr": {
                    "$lt": [{ "$size": { "$ifNull": ["$members", []] } }, 5000_i64],
                },
            }
        );
    }

    #[test]
    fn test_capacity_guard() {
        let guard = Guard::has_member("F1").or(Guard::size_below(2));

        assert_eq!(
            translate(&guard),
            doc! {
                "$or": [
                    { "members": "F1" },
                    { "$expr": { "$lt": [{ "$size": { "$ifNull": ["$members", []] } }, 2_i64] } },
                ],
            }
        );
    }

    #[test]
    fn test_empty_connectives() {
        assert_eq!(translate(&Guard::and([])), doc! {});
        assert_eq!(translate(&Guard::or([])), doc! { "$expr": false });
    }

    #[test]
    fn test_owner_filter() {
        assert_eq!(
            MongoGuardTranslator::owner_filter("U1", None).unwrap(),
            doc! { "_id": "U1" }
        );
        assert_eq!(
            MongoGuardTranslator::owner_filter("U1", Some(&Guard::has_member("F1"))).unwrap(),
            doc! { "$and": [{ "_id": "U1" }, { "members": "F1" }] }
        );
    }
}
