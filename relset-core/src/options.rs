//! Per-call options and read results.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, btree_set};

/// How fresh a read must be.
///
/// Callers layering read-then-decide logic on top of [`list`](crate::store::RelationshipSetStore::list)
/// need [`ReadConsistency::Strong`]; an eventual read may miss the most recent completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConsistency {
    /// Reflects every write that completed before the read started.
    #[default]
    Strong,
    /// May lag behind recent writes.
    Eventual,
}

/// Options for an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddOptions {
    /// Upper bound on the member count after the add. `None` means unbounded.
    pub max_size: Option<usize>,
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

/// Options for a remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    /// Fail with `NotFound` instead of succeeding silently when the member is absent.
    pub require_existing: bool,
}

impl RemoveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_existing(mut self, require_existing: bool) -> Self {
        self.require_existing = require_existing;
        self
    }
}

/// The members of one owner, together with the consistency the read was served with.
///
/// An absent item and an item without members are indistinguishable here: both are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberList {
    members: BTreeSet<String>,
    consistency: ReadConsistency,
}

impl MemberList {
    pub fn new(members: BTreeSet<String>, consistency: ReadConsistency) -> Self {
        Self { members, consistency }
    }

    pub fn empty(consistency: ReadConsistency) -> Self {
        Self::new(BTreeSet::new(), consistency)
    }

    pub fn consistency(&self) -> ReadConsistency {
        self.consistency
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

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.members.iter()
    }
}

impl IntoIterator for MemberList {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

impl<'a> IntoIterator for &'a MemberList {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}
