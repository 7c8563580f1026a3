//! Guard conditions evaluated atomically with a mutation.
//!
//! A guard is a boolean [`Condition`] over a single relationship item. Backends receive it
//! together with the mutation and must evaluate and apply both in one atomic step: when the
//! condition does not hold, nothing is written and the backend reports
//! [`MutationOutcome::Rejected`](crate::backend::MutationOutcome::Rejected).
//!
//! An absent item is evaluated as "does not exist, has zero members".
//!
//! # Guard Expression API
//!
//! - Membership: `has_member`, `lacks_member`
//! - Capacity: `size_below`
//! - Existence: `exists`
//! - Logical: `and`, `or`, plus the chainable [`Condition::and`], [`Condition::or`], [`Condition::not`]
//!
//! ```ignore
//! use relset_core::condition::Guard;
//!
//! // Add only if the member is already there or there is room for one more.
//! let guard = Guard::has_member("F1").or(Guard::size_below(500));
//! ```

use crate::{
    error::{RelationshipStoreError, RelationshipStoreResult},
    item::RelationshipItem,
};

/// A boolean expression over a single relationship item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Logical AND of multiple conditions (all must hold). Empty holds.
    And(Vec<Condition>),
    /// Logical OR of multiple conditions (any must hold). Empty does not hold.
    Or(Vec<Condition>),
    /// Logical NOT of a condition.
    Not(Box<Condition>),
    /// The item exists, i.e. has at least one member.
    ItemExists,
    /// The member set contains the given identifier.
    HasMember(String),
    /// The member set holds strictly fewer than `n` members.
    SizeBelow(usize),
}

impl Condition {
    /// Combines this condition with another using logical AND.
    ///
    /// If this condition is already an AND, the other condition is appended to the list.
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut list) => {
                list.push(other);
                Condition::And(list)
            }
            _ => Condition::And(vec![self, other]),
        }
    }

    /// Combines this condition with another using logical OR.
    ///
    /// If this condition is already an OR, the other condition is appended to the list.
    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut list) => {
                list.push(other);
                Condition::Or(list)
            }
            _ => Condition::Or(vec![self, other]),
        }
    }

    /// Negates this condition (logical NOT).
    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Evaluates this condition against an item, `None` meaning the item is absent.
    pub fn evaluate(&self, item: Option<&RelationshipItem>) -> bool {
        // The evaluator is infallible; the visitor signature is shared with translators.
        ConditionEvaluator::new(item)
            .visit_condition(self)
            .unwrap_or(false)
    }

    /// Returns `true` if the condition holds for an absent item.
    ///
    /// Backends that create items through upserts use this to decide whether a guarded
    /// mutation may create the item when none exists.
    pub fn admits_absent(&self) -> bool {
        self.evaluate(None)
    }
}

/// Helper struct for constructing guard conditions.
pub struct Guard;

impl Guard {
    /// Holds when the member set contains `member`.
    pub fn has_member(member: impl Into<String>) -> Condition {
        Condition::HasMember(member.into())
    }

    /// Holds when the member set does not contain `member` (including when the item is absent).
    pub fn lacks_member(member: impl Into<String>) -> Condition {
        Condition::HasMember(member.into()).not()
    }

    /// Holds when the member set has strictly fewer than `n` members.
    pub fn size_below(n: usize) -> Condition {
        Condition::SizeBelow(n)
    }

    /// Holds when the item exists.
    pub fn exists() -> Condition {
        Condition::ItemExists
    }

    /// Holds when all conditions hold.
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Condition {
        Condition::And(conditions.into_iter().collect())
    }

    /// Holds when any condition holds.
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Condition {
        Condition::Or(conditions.into_iter().collect())
    }
}

/// Visitor over [`Condition`] trees, implemented by backend evaluators and translators.
pub trait ConditionVisitor {
    type Output;
    type Error: Into<RelationshipStoreError>;

    fn visit_and(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, condition: &Condition) -> Result<Self::Output, Self::Error>;
    fn visit_exists(&mut self) -> Result<Self::Output, Self::Error>;
    fn visit_has_member(&mut self, member: &str) -> Result<Self::Output, Self::Error>;
    fn visit_size_below(&mut self, n: usize) -> Result<Self::Output, Self::Error>;

    fn visit_condition(&mut self, condition: &Condition) -> Result<Self::Output, Self::Error> {
        match condition {
            Condition::And(conditions) => self.visit_and(conditions),
            Condition::Or(conditions) => self.visit_or(conditions),
            Condition::Not(condition) => self.visit_not(condition),
            Condition::ItemExists => self.visit_exists(),
            Condition::HasMember(member) => self.visit_has_member(member),
            Condition::SizeBelow(n) => self.visit_size_below(*n),
        }
    }
}

/// Evaluates a condition against an in-hand item snapshot.
pub struct ConditionEvaluator<'a> {
    item: Option<&'a RelationshipItem>,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(item: Option<&'a RelationshipItem>) -> Self {
        Self { item }
    }

    pub fn evaluate(&mut self, condition: &Condition) -> RelationshipStoreResult<bool> {
        self.visit_condition(condition)
    }

    fn len(&self) -> usize {
        self.item.map_or(0, RelationshipItem::len)
    }
}

impl ConditionVisitor for ConditionEvaluator<'_> {
    type Output = bool;
    type Error = RelationshipStoreError;

    fn visit_and(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error> {
        for condition in conditions {
            if !self.visit_condition(condition)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error> {
        for condition in conditions {
            if self.visit_condition(condition)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, condition: &Condition) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_condition(condition)?)
    }

    fn visit_exists(&mut self) -> Result<Self::Output, Self::Error> {
        Ok(self.len() > 0)
    }

    fn visit_has_member(&mut self, member: &str) -> Result<Self::Output, Self::Error> {
        Ok(self.item.is_some_and(|item| item.contains(member)))
    }

    fn visit_size_below(&mut self, n: usize) -> Result<Self::Output, Self::Error> {
        Ok(self.len() < n)
    }
}
