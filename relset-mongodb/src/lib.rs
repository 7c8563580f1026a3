//! MongoDB backend implementation for relset.
//!
//! This crate provides a MongoDB-based implementation of the `SetBackend` trait. Guards are
//! translated into query filters so the server evaluates them atomically with each write.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! relset = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Atomic guarded writes** - `$addToSet` and `$pull` with the guard in the filter
//! - **Delete on empty** - Removing the sole member deletes the owner's document
//! - **Read consistency** - Majority reads on the primary, or secondary-preferred reads
//! - **Expiry** - A TTL index on the `ttl` field, created by `prepare`
//!
//! # Example
//!
//! ```ignore
//! use relset::{RelationshipSetStore, backend::SetBackendBuilder, mongodb::MongoSetBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoSetBackend::builder("mongodb://localhost:27017", "social")
//!         .build()
//!         .await?;
//!     let follows = RelationshipSetStore::new(backend, "follows");
//!     follows.prepare().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as relset_mongodb;

pub mod store;
mod filter;
mod sanitizer;

pub use store::{MongoSetBackend, MongoSetBackendBuilder};
