//! Atomic, guard-aware relationship sets on top of document and key-value stores.
//!
//! A relationship set maps an owner (a user, a post) to a homogeneous set of unique member
//! identifiers (the accounts it follows, its tags). This crate is the core of the relset
//! project and provides:
//!
//! - **Relationship store** ([`store`]) - Atomic add / remove / list / contains with optional guards
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Guard conditions** ([`condition`]) - Conditions evaluated atomically with a mutation
//! - **Item model** ([`item`]) - The persisted relationship item and its invariants
//! - **Identifiers** ([`identifier`]) - Validation of owner and member ids
//! - **Options** ([`options`]) - Per-call options, read consistency and read results
//! - **Configuration** ([`config`]) and **retry policy** ([`retry`])
//! - **Error handling** ([`error`]) - Error taxonomy and result type
//!
//! # Example
//!
//! ```ignore
//! use relset_core::{store::RelationshipSetStore, options::{AddOptions, RemoveOptions}};
//!
//! let follows = RelationshipSetStore::new(backend, "follows");
//!
//! follows.add("U1", "F1", AddOptions::new()).await?;
//! follows.add("U1", "F1", AddOptions::new()).await?; // idempotent
//! assert_eq!(follows.list("U1").await?.len(), 1);
//!
//! follows.remove("U1", "F1", RemoveOptions::new()).await?;
//! assert!(follows.list("U1").await?.is_empty()); // the item is gone, not empty
//! ```

#[allow(unused_extern_crates)]
extern crate self as relset_core;

pub mod backend;
pub mod condition;
pub mod config;
pub mod error;
pub mod identifier;
pub mod item;
pub mod options;
pub mod retry;
pub mod store;
