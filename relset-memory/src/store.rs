//! In-memory storage implementation for relationship sets.
//!
//! Items live in nested hash maps (relation -> owner -> item) behind one async-aware
//! read-write lock. Every mutation evaluates its guard and applies its effect while holding
//! the write lock, which makes each mutation atomic with respect to every other call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mea::{mutex::Mutex, rwlock::RwLock};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};
use tracing::{debug, instrument};

use relset_core::{
    backend::{MutationOutcome, SetBackend, SetBackendBuilder},
    condition::Condition,
    error::{RelationshipStoreError, RelationshipStoreResult},
    item::RelationshipItem,
    options::ReadConsistency,
};

type RelationMap = HashMap<String, RelationshipItem>;
type StoreMap = HashMap<String, RelationMap>;

/// A transport failure the backend reports instead of serving the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Reported as [`RelationshipStoreError::Throttled`].
    Throttled,
    /// Reported as [`RelationshipStoreError::BackendUnavailable`].
    Unavailable,
}

impl InjectedFault {
    fn into_error(self, operation: &str) -> RelationshipStoreError {
        match self {
            InjectedFault::Throttled => {
                RelationshipStoreError::Throttled(format!("injected fault during {operation}"))
            }
            InjectedFault::Unavailable => RelationshipStoreError::BackendUnavailable(format!(
                "injected fault during {operation}"
            )),
        }
    }
}

/// Thread-safe in-memory relationship set backend.
///
/// Cloning is cheap and every clone shares the same underlying data, so one instance can
/// serve several stores (one per relation) and several tasks at once.
///
/// # Consistency
///
/// Every read observes every write that completed before it, so reads requested as
/// [`ReadConsistency::Eventual`] are served, and reported, as strong.
///
/// # Fault Injection
///
/// [`inject_fault`](Self::inject_fault) queues transport failures that the next calls report
/// before touching any state. This lets callers exercise their retry handling without a
/// network.
///
/// # Example
///
/// ```ignore
/// use relset_memory::InMemorySetBackend;
/// use relset_core::backend::SetBackend;
///
/// let backend = InMemorySetBackend::new();
/// backend.add_member("follows", "U1", "F1", None).await?;
/// let item = backend.get_item("follows", "U1", ReadConsistency::Strong).await?;
/// assert!(item.unwrap().contains("F1"));
/// ```
#[derive(Default, Clone)]
pub struct InMemorySetBackend {
    /// relation -> (owner -> item)
    store: Arc<RwLock<StoreMap>>,
    /// Pending faults, consumed front to back
    faults: Arc<Mutex<VecDeque<InjectedFault>>>,
}

impl InMemorySetBackend {
    /// Creates a new empty in-memory backend.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            faults: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Creates a builder for constructing an `InMemorySetBackend` with pre-queued faults.
    pub fn builder() -> InMemorySetBackendBuilder {
        InMemorySetBackendBuilder::default()
    }

    /// Makes the next `times` calls fail with `fault`, after any faults already queued.
    pub async fn inject_fault(&self, fault: InjectedFault, times: usize) {
        self.faults
            .lock()
            .await
            .extend(std::iter::repeat_n(fault, times));
    }

    /// Number of owners holding at least one member in `relation`.
    pub async fn owner_count(&self, relation: &str) -> usize {
        self.store
            .read()
            .await
            .get(relation)
            .map_or(0, HashMap::len)
    }

    async fn take_fault(&self, operation: &str) -> RelationshipStoreResult<()> {
        match self.faults.lock().await.pop_front() {
            Some(fault) => {
                debug!(?fault, operation, "reporting injected fault");
                Err(fault.into_error(operation))
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for InMemorySetBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySetBackend").finish_non_exhaustive()
    }
}

fn guard_holds(guard: Option<&Condition>, item: Option<&RelationshipItem>) -> bool {
    guard.is_none_or(|guard| guard.evaluate(item))
}

#[async_trait]
impl SetBackend for InMemorySetBackend {
    #[instrument(skip(self, guard), fields(guarded = guard.is_some()))]
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        self.take_fault("add_member").await?;

        let mut store = self.store.write().await;
        let current = store
            .get(relation)
            .and_then(|relation_map| relation_map.get(owner));

        if !guard_holds(guard.as_ref(), current) {
            return Ok(MutationOutcome::Rejected);
        }

        let relation_map = store.entry(relation.to_string()).or_default();

        match relation_map.get_mut(owner) {
            Some(item) => {
                item.insert(member);
            }
            None => {
                if let Some(item) = RelationshipItem::new(owner, [member]) {
                    relation_map.insert(owner.to_string(), item);
                }
            }
        }

        Ok(MutationOutcome::Applied)
    }

    #[instrument(skip(self, guard), fields(guarded = guard.is_some()))]
    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        self.take_fault("remove_member").await?;

        let mut store = self.store.write().await;
        let Some(relation_map) = store.get_mut(relation) else {
            return Ok(if guard_holds(guard.as_ref(), None) {
                MutationOutcome::Applied
            } else {
                MutationOutcome::Rejected
            });
        };

        if !guard_holds(guard.as_ref(), relation_map.get(owner)) {
            return Ok(MutationOutcome::Rejected);
        }

        // Take the item out and put back only what is left, so an emptied set is never stored.
        if let Some(remaining) = relation_map
            .remove(owner)
            .and_then(|item| item.without(member))
        {
            relation_map.insert(owner.to_string(), remaining);
        }
        if relation_map.is_empty() {
            store.remove(relation);
        }

        Ok(MutationOutcome::Applied)
    }

    #[instrument(skip(self))]
    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        _consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        self.take_fault("get_item").await?;

        Ok(
            self.store
                .read()
                .await
                .get(relation)
                .and_then(|relation_map| relation_map.get(owner))
                .cloned()
        )
    }

    #[instrument(skip(self))]
    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        _consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        self.take_fault("check").await?;

        let store = self.store.read().await;
        let item = store
            .get(relation)
            .and_then(|relation_map| relation_map.get(owner));

        Ok(condition.evaluate(item))
    }

    #[instrument(skip(self))]
    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        self.take_fault("set_ttl").await?;

        let mut store = self.store.write().await;

        match store
            .get_mut(relation)
            .and_then(|relation_map| relation_map.get_mut(owner))
        {
            Some(item) => {
                item.ttl = ttl;
                Ok(MutationOutcome::Applied)
            }
            None => Ok(MutationOutcome::Rejected),
        }
    }

    fn served_consistency(&self, _requested: ReadConsistency) -> ReadConsistency {
        ReadConsistency::Strong
    }
}

/// Builder for constructing [`InMemorySetBackend`] instances.
///
/// ```ignore
/// use relset_memory::{InMemorySetBackend, InjectedFault};
/// use relset_core::backend::SetBackendBuilder;
///
/// let backend = InMemorySetBackend::builder()
///     .fault(InjectedFault::Throttled, 2)
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemorySetBackendBuilder {
    faults: VecDeque<InjectedFault>,
}

impl InMemorySetBackendBuilder {
    /// Queues `times` occurrences of `fault` for the first calls served by the backend.
    pub fn fault(mut self, fault: InjectedFault, times: usize) -> Self {
        self.faults.extend(std::iter::repeat_n(fault, times));
        self
    }
}

#[async_trait]
impl SetBackendBuilder for InMemorySetBackendBuilder {
    type Backend = InMemorySetBackend;

    /// Always succeeds.
    async fn build(self) -> RelationshipStoreResult<Self::Backend> {
        Ok(InMemorySetBackend {
            store: Arc::new(RwLock::new(StoreMap::new())),
            faults: Arc::new(Mutex::new(self.faults)),
        })
    }
}
