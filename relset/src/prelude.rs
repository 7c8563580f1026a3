//! Convenient re-exports of commonly used types from relset.
//!
//! ```ignore
//! use relset::prelude::*;
//! ```

pub use relset_core::{
    backend::{DynSetBackend, MutationOutcome, SetBackend, SetBackendBuilder},
    condition::{Condition, ConditionVisitor, Guard},
    config::StoreConfig,
    error::{RelationshipStoreError, RelationshipStoreResult},
    identifier::Identifier,
    item::RelationshipItem,
    options::{AddOptions, MemberList, ReadConsistency, RemoveOptions},
    retry::RetryPolicy,
    store::{DynRelationshipSetStore, RelationshipSetStore, RelationshipSetStoreBuilder},
};
