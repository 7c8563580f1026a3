//! The relationship set store.
//!
//! [`RelationshipSetStore`] owns the mapping from an owner to the set of members it references
//! (the accounts a user follows, the tags on a post) for one relation, and turns each
//! operation into a single guarded backend mutation.
//!
//! - [`RelationshipSetStore`] - Store bound to a concrete backend type
//! - [`DynRelationshipSetStore`] - Store over a boxed backend, for runtime backend selection
//!
//! # Example
//!
//! ```ignore
//! use relset::{prelude::*, memory::InMemorySetBackend};
//!
//! let store = RelationshipSetStore::new(InMemorySetBackend::new(), "follows");
//!
//! store.add("U1", "F1", AddOptions::new().max_size(5_000)).await?;
//! assert!(store.contains("U1", "F1").await?);
//!
//! store.remove("U1", "F1", RemoveOptions::new().require_existing(true)).await?;
//! assert!(store.list("U1").await?.is_empty());
//! ```
//!
//! # Consistency and Concurrency
//!
//! `add` and `remove` are single atomic backend steps, so concurrent callers never lose each
//! other's updates. `add_new` and cross-owner bookkeeping (e.g. maintaining both "follows"
//! and "followed by") are not atomic as compound actions; see their documentation.
//!
//! A call that was cancelled or timed out locally may still have been committed by the
//! backend. Re-issuing it is safe because every mutation is idempotent or guard-protected.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::{
    backend::{DynSetBackend, MutationOutcome, SetBackend},
    condition::{Condition, Guard},
    config::StoreConfig,
    error::{RelationshipStoreError, RelationshipStoreResult},
    identifier::Identifier,
    item::RelationshipItem,
    options::{AddOptions, MemberList, ReadConsistency, RemoveOptions},
    retry::RetryPolicy,
};

/// Upper bound on re-attempts when `add_new` observes the owner changing underneath it.
const ADD_NEW_ATTEMPTS_MAX: u32 = 8;

/// A relationship set store bound to a specific backend implementation.
///
/// The backend is injected at construction and reused for every call; clone-able backends
/// (like the in-memory and MongoDB ones) can serve several stores, one per relation.
#[derive(Debug)]
pub struct RelationshipSetStore<B: SetBackend> {
    backend: B,
    config: StoreConfig,
}

/// A relationship set store over a dynamically dispatched backend.
pub type DynRelationshipSetStore = RelationshipSetStore<Box<dyn DynSetBackend>>;

impl<B: SetBackend> RelationshipSetStore<B> {
    /// Creates a store for `relation` with strong reads and no retries.
    ///
    /// The relation name is taken as given. Use [`builder`](Self::builder) or
    /// [`from_config`](Self::from_config) when the name comes from outside the program:
    /// both reject a blank name with [`RelationshipStoreError::Configuration`].
    pub fn new(backend: B, relation: impl Into<String>) -> Self {
        Self {
            backend,
            config: StoreConfig::new(relation),
        }
    }

    /// Creates a store from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipStoreError::Configuration`] if the configuration is invalid.
    pub fn from_config(backend: B, config: StoreConfig) -> RelationshipStoreResult<Self> {
        config.validate()?;

        Ok(Self { backend, config })
    }

    pub fn builder(backend: B, relation: impl Into<String>) -> RelationshipSetStoreBuilder<B> {
        RelationshipSetStoreBuilder::new(backend, relation)
    }

    pub fn relation(&self) -> &str {
        &self.config.relation
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Atomically adds `member` to the owner's set, creating the item if needed.
    ///
    /// Adding a member that is already present succeeds and changes nothing. With
    /// `options.max_size`, the bound is checked atomically with the insert: an add that would
    /// grow the set past it fails and writes nothing. Adding an already-present member to a
    /// full set still succeeds since it does not grow the set.
    ///
    /// # Errors
    ///
    /// - [`RelationshipStoreError::InvalidIdentifier`] for malformed ids, before any backend call
    /// - [`RelationshipStoreError::CapacityExceeded`] if the capacity guard rejected the add
    /// - transport errors from the backend, after the configured retry policy ran out
    #[instrument(skip(self, options), fields(relation = %self.config.relation, max_size = ?options.max_size))]
    pub async fn add(
        &self,
        owner: &str,
        member: &str,
        options: AddOptions,
    ) -> RelationshipStoreResult<()> {
        let (owner, member) = validate_pair(owner, member)?;
        let guard = options
            .max_size
            .map(|max_size| Guard::has_member(member.as_str()).or(Guard::size_below(max_size)));

        match self.add_guarded("add", &owner, &member, guard).await? {
            MutationOutcome::Applied => {
                debug!("member added");
                Ok(())
            }
            MutationOutcome::Rejected => Err(self.capacity_exceeded(&owner, options)),
        }
    }

    /// Adds `member` and reports whether it was newly inserted.
    ///
    /// The insert is guarded by "member absent" and evaluated by the backend at mutation
    /// time, so two concurrent `add_new` calls for the same pair never both return `true`.
    /// When the guard rejects the insert, a strongly consistent read decides between
    /// "already present" (`Ok(false)`) and "at capacity". That classification step is
    /// best-effort: if the owner keeps changing between the two steps the insert is
    /// re-attempted a bounded number of times before [`RelationshipStoreError::Contended`]
    /// is returned.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add), plus [`RelationshipStoreError::Contended`].
    #[instrument(skip(self, options), fields(relation = %self.config.relation, max_size = ?options.max_size))]
    pub async fn add_new(
        &self,
        owner: &str,
        member: &str,
        options: AddOptions,
    ) -> RelationshipStoreResult<bool> {
        let (owner, member) = validate_pair(owner, member)?;
        let guard = match options.max_size {
            Some(max_size) => Guard::lacks_member(member.as_str()).and(Guard::size_below(max_size)),
            None => Guard::lacks_member(member.as_str()),
        };

        for attempt in 1..=ADD_NEW_ATTEMPTS_MAX {
            if self
                .add_guarded("add_new", &owner, &member, Some(guard.clone()))
                .await?
                .is_applied()
            {
                debug!("member added");
                return Ok(true);
            }

            let item = self.read_item(&owner, ReadConsistency::Strong).await?;
            let len = item.as_ref().map_or(0, RelationshipItem::len);

            if item.is_some_and(|item| item.contains(&member)) {
                debug!("member already present");
                return Ok(false);
            }
            if options.max_size.is_some_and(|max_size| len >= max_size) {
                return Err(self.capacity_exceeded(&owner, options));
            }

            warn!(attempt, "owner changed between guarded add and classification");
        }

        Err(RelationshipStoreError::Contended {
            owner: owner.into_string(),
            attempts: ADD_NEW_ATTEMPTS_MAX,
        })
    }

    /// Atomically removes `member` from the owner's set.
    ///
    /// Removing the last member deletes the item in the same atomic step. Removing an absent
    /// member succeeds and changes nothing, unless `options.require_existing` is set, in which
    /// case the membership check is evaluated atomically with the removal.
    ///
    /// # Errors
    ///
    /// - [`RelationshipStoreError::InvalidIdentifier`] for malformed ids, before any backend call
    /// - [`RelationshipStoreError::NotFound`] if `require_existing` is set and the member is absent
    /// - transport errors from the backend, after the configured retry policy ran out
    #[instrument(skip(self, options), fields(relation = %self.config.relation, require_existing = options.require_existing))]
    pub async fn remove(
        &self,
        owner: &str,
        member: &str,
        options: RemoveOptions,
    ) -> RelationshipStoreResult<()> {
        let (owner, member) = validate_pair(owner, member)?;
        let guard = options
            .require_existing
            .then(|| Guard::has_member(member.as_str()));
        let relation = self.relation();

        let outcome = self
            .config
            .retry
            .run("remove", || {
                SetBackend::remove_member(&self.backend, relation, &owner, &member, guard.clone())
            })
            .await?;

        match outcome {
            MutationOutcome::Applied => {
                debug!("member removed");
                Ok(())
            }
            MutationOutcome::Rejected => Err(RelationshipStoreError::NotFound {
                owner: owner.into_string(),
                member: member.into_string(),
            }),
        }
    }

    /// Lists the owner's members using the configured default consistency.
    ///
    /// An absent owner yields an empty list. Check [`MemberList::consistency`] before basing
    /// a decision on the result.
    pub async fn list(&self, owner: &str) -> RelationshipStoreResult<MemberList> {
        self.list_with(owner, self.config.read_consistency).await
    }

    /// Lists the owner's members with an explicit consistency requirement.
    #[instrument(skip(self), fields(relation = %self.config.relation))]
    pub async fn list_with(
        &self,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<MemberList> {
        let owner = Identifier::parse(owner)?;
        let served = SetBackend::served_consistency(&self.backend, consistency);
        let item = self.read_item(&owner, consistency).await?;

        Ok(match item {
            Some(item) => MemberList::new(item.into_members(), served),
            None => MemberList::empty(served),
        })
    }

    /// Returns `true` if `member` is in the owner's set.
    ///
    /// The membership test is pushed to the backend as a guard-only check; the member set is
    /// not transferred. Uses the configured default consistency.
    #[instrument(skip(self), fields(relation = %self.config.relation))]
    pub async fn contains(&self, owner: &str, member: &str) -> RelationshipStoreResult<bool> {
        let (owner, member) = validate_pair(owner, member)?;

        self.check(&owner, Guard::has_member(member.into_string()), self.config.read_consistency)
            .await
    }

    /// Evaluates an arbitrary guard condition against the owner's item.
    pub async fn check(
        &self,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        let owner = Identifier::parse(owner)?;
        let relation = self.relation();

        self.config
            .retry
            .run("check", || {
                SetBackend::check(&self.backend, relation, &owner, condition.clone(), consistency)
            })
            .await
    }

    /// Sets or clears the advisory expiry timestamp of an existing item.
    ///
    /// The store never evaluates the timestamp; backends with native expiry (see
    /// [`prepare`](Self::prepare)) delete the item some time after it passes.
    ///
    /// # Errors
    ///
    /// [`RelationshipStoreError::ItemNotFound`] if the owner has no members: an expiry cannot
    /// create an item.
    #[instrument(skip(self), fields(relation = %self.config.relation))]
    pub async fn set_ttl(
        &self,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<()> {
        let owner = Identifier::parse(owner)?;
        let relation = self.relation();

        let outcome = self
            .config
            .retry
            .run("set_ttl", || SetBackend::set_ttl(&self.backend, relation, &owner, ttl))
            .await?;

        match outcome {
            MutationOutcome::Applied => Ok(()),
            MutationOutcome::Rejected => Err(RelationshipStoreError::ItemNotFound {
                owner: owner.into_string(),
            }),
        }
    }

    /// Prepares backend structures for this relation. Idempotent.
    pub async fn prepare(&self) -> RelationshipStoreResult<()> {
        SetBackend::prepare_relation(&self.backend, self.relation()).await
    }

    /// Shuts down the store and releases backend resources.
    pub async fn shutdown(self) -> RelationshipStoreResult<()> {
        SetBackend::shutdown(self.backend).await
    }

    async fn add_guarded(
        &self,
        operation: &str,
        owner: &Identifier,
        member: &Identifier,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        let relation = self.relation();

        self.config
            .retry
            .run(operation, || {
                SetBackend::add_member(&self.backend, relation, owner, member, guard.clone())
            })
            .await
    }

    async fn read_item(
        &self,
        owner: &Identifier,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        let relation = self.relation();

        self.config
            .retry
            .run("get_item", || {
                SetBackend::get_item(&self.backend, relation, owner, consistency)
            })
            .await
    }

    fn capacity_exceeded(&self, owner: &Identifier, options: AddOptions) -> RelationshipStoreError {
        RelationshipStoreError::CapacityExceeded {
            owner: owner.to_string(),
            max_size: options.max_size.unwrap_or_default(),
        }
    }
}

impl<B: SetBackend + 'static> RelationshipSetStore<B> {
    /// Converts this store into one over a boxed backend.
    pub fn into_dyn(self) -> DynRelationshipSetStore {
        RelationshipSetStore {
            backend: Box::new(self.backend),
            config: self.config,
        }
    }
}

impl DynRelationshipSetStore {
    /// Creates a store over an already boxed backend.
    pub fn from_boxed(backend: Box<dyn DynSetBackend>, relation: impl Into<String>) -> Self {
        Self::new(backend, relation)
    }

    /// Returns the concrete backend if it is a `T`.
    pub fn downcast_backend<T: SetBackend + 'static>(&self) -> Option<&T> {
        DynSetBackend::as_any(&*self.backend).downcast_ref::<T>()
    }

    /// Converts back into a statically typed store if the backend is a `T`.
    pub fn into_static<T: SetBackend + 'static>(self) -> Option<RelationshipSetStore<T>> {
        let config = self.config;
        let backend = DynSetBackend::into_any(self.backend)
            .downcast::<T>()
            .ok()?;

        Some(RelationshipSetStore {
            backend: *backend,
            config,
        })
    }
}

/// Builder for [`RelationshipSetStore`].
///
/// ```ignore
/// let store = RelationshipSetStore::builder(backend, "follows")
///     .read_consistency(ReadConsistency::Eventual)
///     .retry_policy(RetryPolicy::exponential(3))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct RelationshipSetStoreBuilder<B: SetBackend> {
    backend: B,
    config: StoreConfig,
}

impl<B: SetBackend> RelationshipSetStoreBuilder<B> {
    pub fn new(backend: B, relation: impl Into<String>) -> Self {
        Self {
            backend,
            config: StoreConfig::new(relation),
        }
    }

    pub fn read_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.config.read_consistency = consistency;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Validates the configuration and builds the store.
    pub fn build(self) -> RelationshipStoreResult<RelationshipSetStore<B>> {
        RelationshipSetStore::from_config(self.backend, self.config)
    }
}

fn validate_pair(owner: &str, member: &str) -> RelationshipStoreResult<(Identifier, Identifier)> {
    Ok((Identifier::parse(owner)?, Identifier::parse(member)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    /// Backend that answers every call from a fixed script and records what it saw.
    #[derive(Debug, Default)]
    struct ScriptedBackend {
        outcome: Option<MutationOutcome>,
        transient_failures: AtomicU32,
        calls: AtomicU32,
        guards: Mutex<Vec<Option<Condition>>>,
        item: Option<RelationshipItem>,
    }

    impl ScriptedBackend {
        fn answering(outcome: MutationOutcome) -> Self {
            Self {
                outcome: Some(outcome),
                ..Self::default()
            }
        }

        fn record(&self, guard: Option<Condition>) -> RelationshipStoreResult<MutationOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.guards.lock().unwrap().push(guard);

            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(RelationshipStoreError::Throttled("scripted".into()));
            }

            Ok(self.outcome.unwrap_or(MutationOutcome::Applied))
        }
    }

    #[async_trait]
    impl SetBackend for ScriptedBackend {
        async fn add_member(
            &self,
            _relation: &str,
            _owner: &str,
            _member: &str,
            guard: Option<Condition>,
        ) -> RelationshipStoreResult<MutationOutcome> {
            self.record(guard)
        }

        async fn remove_member(
            &self,
            _relation: &str,
            _owner: &str,
            _member: &str,
            guard: Option<Condition>,
        ) -> RelationshipStoreResult<MutationOutcome> {
            self.record(guard)
        }

        async fn get_item(
            &self,
            _relation: &str,
            _owner: &str,
            _consistency: ReadConsistency,
        ) -> RelationshipStoreResult<Option<RelationshipItem>> {
            Ok(self.item.clone())
        }

        async fn check(
            &self,
            _relation: &str,
            _owner: &str,
            condition: Condition,
            _consistency: ReadConsistency,
        ) -> RelationshipStoreResult<bool> {
            Ok(condition.evaluate(self.item.as_ref()))
        }

        async fn set_ttl(
            &self,
            _relation: &str,
            _owner: &str,
            _ttl: Option<DateTime<Utc>>,
        ) -> RelationshipStoreResult<MutationOutcome> {
            self.record(None)
        }

        fn served_consistency(&self, _requested: ReadConsistency) -> ReadConsistency {
            ReadConsistency::Strong
        }
    }

    #[tokio::test]
    async fn test_invalid_identifiers_never_reach_backend() {
        let store = RelationshipSetStore::new(ScriptedBackend::default(), "follows");

        let err = store.add("", "F1", AddOptions::new()).await.unwrap_err();
        assert!(matches!(err, RelationshipStoreError::InvalidIdentifier { .. }));

        let err = store
            .remove("U1", "bad\u{0}id", RemoveOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelationshipStoreError::InvalidIdentifier { .. }));

        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capacity_guard_is_sent_with_add() {
        let store = RelationshipSetStore::new(ScriptedBackend::default(), "follows");
        store.add("U1", "F1", AddOptions::new().max_size(10)).await.unwrap();
        store.add("U1", "F2", AddOptions::new()).await.unwrap();

        let guards = store.backend().guards.lock().unwrap().clone();
        assert_eq!(
            guards,
            vec![
                Some(Guard::has_member("F1").or(Guard::size_below(10))),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn test_rejections_map_to_domain_errors() {
        let store = RelationshipSetStore::new(
            ScriptedBackend::answering(MutationOutcome::Rejected),
            "follows",
        );

        let err = store
            .add("U1", "F1", AddOptions::new().max_size(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RelationshipStoreError::CapacityExceeded {
                owner: "U1".into(),
                max_size: 1
            }
        );

        let err = store
            .remove("U1", "F1", RemoveOptions::new().require_existing(true))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RelationshipStoreError::NotFound {
                owner: "U1".into(),
                member: "F1".into()
            }
        );

        let err = store.set_ttl("U1", None).await.unwrap_err();
        assert!(matches!(err, RelationshipStoreError::ItemNotFound { .. }));
    }

    #[tokio::test]
    async fn test_no_silent_retry_by_default() {
        let backend = ScriptedBackend::default();
        backend.transient_failures.store(1, Ordering::SeqCst);
        let store = RelationshipSetStore::new(backend, "follows");

        let err = store.add("U1", "F1", AddOptions::new()).await.unwrap_err();
        assert!(matches!(err, RelationshipStoreError::Throttled(_)));
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_retry_recovers() {
        let backend = ScriptedBackend::default();
        backend.transient_failures.store(2, Ordering::SeqCst);
        let store = RelationshipSetStore::builder(backend, "follows")
            .retry_policy(RetryPolicy::exponential(3))
            .build()
            .unwrap();

        store.add("U1", "F1", AddOptions::new()).await.unwrap();
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_add_new_reports_existing_member() {
        let backend = ScriptedBackend {
            outcome: Some(MutationOutcome::Rejected),
            item: RelationshipItem::new("U1", ["F1"]),
            ..ScriptedBackend::default()
        };
        let store = RelationshipSetStore::new(backend, "follows");

        assert!(!store.add_new("U1", "F1", AddOptions::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_new_reports_capacity() {
        let backend = ScriptedBackend {
            outcome: Some(MutationOutcome::Rejected),
            item: RelationshipItem::new("U1", ["F1", "F2"]),
            ..ScriptedBackend::default()
        };
        let store = RelationshipSetStore::new(backend, "follows");

        let err = store
            .add_new("U1", "F3", AddOptions::new().max_size(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RelationshipStoreError::CapacityExceeded { max_size: 2, .. }));
    }

    #[tokio::test]
    async fn test_add_new_gives_up_under_contention() {
        // Rejected, yet the snapshot shows neither the member nor a full set.
        let backend = ScriptedBackend {
            outcome: Some(MutationOutcome::Rejected),
            item: RelationshipItem::new("U1", ["F9"]),
            ..ScriptedBackend::default()
        };
        let store = RelationshipSetStore::new(backend, "follows");

        let err = store.add_new("U1", "F1", AddOptions::new()).await.unwrap_err();
        assert_eq!(
            err,
            RelationshipStoreError::Contended {
                owner: "U1".into(),
                attempts: ADD_NEW_ATTEMPTS_MAX
            }
        );
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_list_reports_served_consistency() {
        let backend = ScriptedBackend {
            item: RelationshipItem::new("U1", ["F1"]),
            ..ScriptedBackend::default()
        };
        let store = RelationshipSetStore::builder(backend, "follows")
            .read_consistency(ReadConsistency::Eventual)
            .build()
            .unwrap();

        let list = store.list("U1").await.unwrap();
        assert_eq!(list.consistency(), ReadConsistency::Strong);
        assert!(list.contains("F1"));
    }

    #[tokio::test]
    async fn test_dyn_round_trip() {
        let store = RelationshipSetStore::new(ScriptedBackend::default(), "follows").into_dyn();
        store.add("U1", "F1", AddOptions::new()).await.unwrap();

        assert!(store.downcast_backend::<ScriptedBackend>().is_some());

        let store = store.into_static::<ScriptedBackend>().unwrap();
        assert_eq!(store.backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.relation(), "follows");
    }

    #[test]
    fn test_builder_validates_config() {
        let result = RelationshipSetStore::builder(ScriptedBackend::default(), "")
            .build();
        assert!(matches!(result, Err(RelationshipStoreError::Configuration(_))));
    }

    #[test]
    fn test_new_skips_relation_validation() {
        let result = RelationshipSetStore::from_config(ScriptedBackend::default(), StoreConfig::new("  "));
        assert!(matches!(result, Err(RelationshipStoreError::Configuration(_))));

        let store = RelationshipSetStore::new(ScriptedBackend::default(), "");
        assert!(matches!(
            store.config().validate(),
            Err(RelationshipStoreError::Configuration(_))
        ));
    }
}
