//! Storage backend abstraction for relationship sets.
//!
//! This module defines the contract a key-value or document engine must satisfy to host
//! relationship sets: single-item atomic set mutations with an optional guard
//! [`Condition`], point reads of one item, and guard-only checks.
//!
//! # Overview
//!
//! - [`SetBackend`]: the core async trait implemented by every backend
//! - [`DynSetBackend`]: an object-safe twin for dynamic dispatch over backends
//! - [`SetBackendBuilder`]: factory trait for creating backend instances
//!
//! Items are addressed by a `relation` name (e.g. `"follows"`) and an owner id. Each
//! relation is an independent keyspace.
//!
//! # Atomicity
//!
//! Every mutation evaluates its guard and applies its effect as one atomic step scoped to a
//! single item. No backend may ever persist an item with an empty member set: removing the
//! last member deletes the item in the same step.
//!
//! # Cancellation
//!
//! Each call is a single bounded request. Dropping the future before the backend commits
//! leaves state unchanged; dropping it afterwards does not undo the commit. A caller whose
//! call was cancelled or timed out locally cannot assume the mutation did not happen.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{any::Any, fmt::Debug, sync::Arc};

use crate::{
    condition::Condition,
    error::RelationshipStoreResult,
    item::RelationshipItem,
    options::ReadConsistency,
};

/// Result of a guarded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The guard held (or there was none) and the mutation was applied. Applying a mutation
    /// that does not change state, like adding a present member, is still `Applied`.
    Applied,
    /// The guard did not hold. Nothing was written.
    Rejected,
}

impl MutationOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

/// Abstract interface for relationship set storage backends.
///
/// Implementations must be thread-safe and support concurrent access from multiple async
/// tasks. Transport failures must be reported as
/// [`BackendUnavailable`](crate::error::RelationshipStoreError::BackendUnavailable) or
/// [`Throttled`](crate::error::RelationshipStoreError::Throttled) so callers can retry them;
/// backends must not retry silently.
#[async_trait]
pub trait SetBackend: Send + Sync + Debug {
    /// Atomically inserts `member` into the owner's set, creating the item if absent.
    ///
    /// The guard is evaluated against the item as it was before the insert, with an absent
    /// item treated as having no members.
    ///
    /// # Returns
    ///
    /// [`MutationOutcome::Rejected`] if the guard did not hold, otherwise
    /// [`MutationOutcome::Applied`] whether or not the member was already present.
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome>;

    /// Atomically removes `member` from the owner's set, deleting the item if it becomes empty.
    ///
    /// Removing an absent member is a no-op reported as [`MutationOutcome::Applied`], unless
    /// the guard rejects it.
    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome>;

    /// Reads one item, or `None` if the owner has no members.
    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>>;

    /// Evaluates `condition` against one item without transferring its member set.
    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool>;

    /// Sets or clears the advisory expiry of an existing item.
    ///
    /// # Returns
    ///
    /// [`MutationOutcome::Rejected`] if the item does not exist. Never creates an item.
    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome>;

    /// Returns the consistency a read requested as `requested` is actually served with.
    fn served_consistency(&self, requested: ReadConsistency) -> ReadConsistency {
        requested
    }

    /// Prepares backend structures for a relation (collections, expiry indexes).
    ///
    /// Must be idempotent. The default implementation is a no-op.
    async fn prepare_relation(&self, _relation: &str) -> RelationshipStoreResult<()> {
        Ok(())
    }

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> RelationshipStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> SetBackend for &B
where
    B: SetBackend,
{
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::add_member(*self, relation, owner, member, guard)
            .await
    }

    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::remove_member(*self, relation, owner, member, guard)
            .await
    }

    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        SetBackend::get_item(*self, relation, owner, consistency)
            .await
    }

    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        SetBackend::check(*self, relation, owner, condition, consistency)
            .await
    }

    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::set_ttl(*self, relation, owner, ttl).await
    }

    fn served_consistency(&self, requested: ReadConsistency) -> ReadConsistency {
        SetBackend::served_consistency(*self, requested)
    }

    async fn prepare_relation(&self, relation: &str) -> RelationshipStoreResult<()> {
        SetBackend::prepare_relation(*self, relation).await
    }
}

#[async_trait]
impl<B> SetBackend for Arc<B>
where
    B: SetBackend,
{
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::add_member(&**self, relation, owner, member, guard)
            .await
    }

    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::remove_member(&**self, relation, owner, member, guard)
            .await
    }

    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        SetBackend::get_item(&**self, relation, owner, consistency)
            .await
    }

    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        SetBackend::check(&**self, relation, owner, condition, consistency)
            .await
    }

    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::set_ttl(&**self, relation, owner, ttl).await
    }

    fn served_consistency(&self, requested: ReadConsistency) -> ReadConsistency {
        SetBackend::served_consistency(&**self, requested)
    }

    async fn prepare_relation(&self, relation: &str) -> RelationshipStoreResult<()> {
        SetBackend::prepare_relation(&**self, relation).await
    }

    async fn shutdown(self) -> RelationshipStoreResult<()>
    where
        Self: Sized,
    {
        // Only the last handle owns the backend's resources.
        match Arc::try_unwrap(self) {
            Ok(backend) => backend.shutdown().await,
            Err(_) => Ok(()),
        }
    }
}

/// Object-safe version of [`SetBackend`], implemented for every `SetBackend + 'static`.
#[async_trait]
pub trait DynSetBackend: Send + Sync + Debug {
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome>;
    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome>;
    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>>;
    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool>;
    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome>;
    fn served_consistency(&self, requested: ReadConsistency) -> ReadConsistency;
    async fn prepare_relation(&self, relation: &str) -> RelationshipStoreResult<()>;
    async fn shutdown_boxed(self: Box<Self>) -> RelationshipStoreResult<()>;

    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

#[async_trait]
impl<B: SetBackend + 'static> DynSetBackend for B {
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::add_member(self, relation, owner, member, guard).await
    }

    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::remove_member(self, relation, owner, member, guard).await
    }

    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        SetBackend::get_item(self, relation, owner, consistency).await
    }

    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        SetBackend::check(self, relation, owner, condition, consistency).await
    }

    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        SetBackend::set_ttl(self, relation, owner, ttl).await
    }

    fn served_consistency(&self, requested: ReadConsistency) -> ReadConsistency {
        SetBackend::served_consistency(self, requested)
    }

    async fn prepare_relation(&self, relation: &str) -> RelationshipStoreResult<()> {
        SetBackend::prepare_relation(self, relation).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> RelationshipStoreResult<()> {
        SetBackend::shutdown(*self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[async_trait]
impl SetBackend for Box<dyn DynSetBackend> {
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        DynSetBackend::add_member(&**self, relation, owner, member, guard).await
    }

    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        DynSetBackend::remove_member(&**self, relation, owner, member, guard).await
    }

    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        DynSetBackend::get_item(&**self, relation, owner, consistency).await
    }

    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        DynSetBackend::check(&**self, relation, owner, condition, consistency).await
    }

    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        DynSetBackend::set_ttl(&**self, relation, owner, ttl).await
    }

    fn served_consistency(&self, requested: ReadConsistency) -> ReadConsistency {
        DynSetBackend::served_consistency(&**self, requested)
    }

    async fn prepare_relation(&self, relation: &str) -> RelationshipStoreResult<()> {
        DynSetBackend::prepare_relation(&**self, relation).await
    }

    async fn shutdown(self) -> RelationshipStoreResult<()>
    where
        Self: Sized,
    {
        DynSetBackend::shutdown_boxed(self).await
    }
}

/// Factory for backends that need async setup (connections, handshakes).
#[async_trait]
pub trait SetBackendBuilder {
    type Backend: SetBackend;

    async fn build(self) -> RelationshipStoreResult<Self::Backend>;
}
