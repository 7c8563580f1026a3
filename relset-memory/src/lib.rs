//! In-memory relationship set backend for relset.
//!
//! This crate provides a thread-safe, in-memory implementation of the `SetBackend` trait.
//! It uses an async-aware read-write lock for concurrent access and is meant for development,
//! testing, and single-process deployments.
//!
//! # Features
//!
//! - **Atomic guarded mutations** - Guards are evaluated and applied under one write lock
//! - **Delete on empty** - Removing the last member removes the owner's item
//! - **Fault injection** - Queue throttling or outage errors to exercise retry handling
//!
//! # Quick Start
//!
//! ```ignore
//! use relset::{RelationshipSetStore, memory::InMemorySetBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemorySetBackend::builder().build().await?;
//!     let follows = RelationshipSetStore::new(backend, "follows");
//!
//!     follows.add("U1", "F1", AddOptions::new().max_size(5000)).await?;
//!     assert!(follows.contains("U1", "F1").await?);
//!
//!     follows.remove("U1", "F1", RemoveOptions::new()).await?;
//!     assert!(follows.list("U1").await?.is_empty());
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as relset_memory;

pub mod store;

pub use store::{InMemorySetBackend, InMemorySetBackendBuilder, InjectedFault};
