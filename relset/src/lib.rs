//! Main relset crate providing atomic, guard-aware relationship sets.
//!
//! A relationship set records which members an owner references under a named relation,
//! such as the accounts a user follows. Each owner's members are stored as one item, so
//! adds and removes are single atomic updates. Optional guards make them conditional:
//! an add can be capped at a maximum size, a remove can require the member to be present.
//!
//! This crate re-exports the core types from the sub-crates and provides access to the
//! storage backends.
//!
//! # Features
//!
//! - **Atomic mutations** - Every add or remove is one backend step, guard included
//! - **Delete on empty** - Removing the last member deletes the owner's item
//! - **Explicit consistency** - Reads report whether they were served strongly or eventually
//! - **Caller-owned retries** - Transient failures are retried only under a configured policy
//!
//! # Quick Start
//!
//! ```ignore
//! use relset::{prelude::*, memory::InMemorySetBackend};
//!
//! #[tokio::main]
//! async fn main() -> RelationshipStoreResult<()> {
//!     let backend = InMemorySetBackend::builder().build().await?;
//!     let follows = RelationshipSetStore::builder(backend, "follows")
//!         .retry_policy(RetryPolicy::exponential(3))
//!         .build()?;
//!
//!     // Follow, capped at 5000 followees
//!     follows.add("U1", "F1", AddOptions::new().max_size(5000)).await?;
//!
//!     // Read back, and check how fresh the read was
//!     let followees = follows.list("U1").await?;
//!     assert_eq!(followees.consistency(), ReadConsistency::Strong);
//!
//!     // Unfollow; fails with NotFound if U1 did not follow F1
//!     follows
//!         .remove("U1", "F1", RemoveOptions::new().require_existing(true))
//!         .await?;
//!
//!     follows.shutdown().await
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! A statically typed store converts into a [`DynRelationshipSetStore`](store::DynRelationshipSetStore)
//! with `into_dyn`, which allows selecting the backend at runtime. The concrete backend can
//! be recovered with `downcast_backend` or `into_static`.
//!
//! ```ignore
//! use relset::{prelude::*, memory::InMemorySetBackend};
//!
//! let store = RelationshipSetStore::new(InMemorySetBackend::new(), "follows").into_dyn();
//! store.add("U1", "F1", AddOptions::new()).await?;
//!
//! let backend = store.downcast_backend::<InMemorySetBackend>().unwrap();
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use relset_core::{
    backend, condition, config, error, identifier, item, options, retry, store,
};

pub use relset_core::store::RelationshipSetStore;

// Re-exports used by backend implementations outside this workspace
pub use async_trait::async_trait;
pub use bson;
pub use chrono;

/// In-memory storage backend implementations.
pub mod memory {
    pub use relset_memory::{InMemorySetBackend, InMemorySetBackendBuilder, InjectedFault};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use relset_mongodb::{MongoSetBackend, MongoSetBackendBuilder};
}
