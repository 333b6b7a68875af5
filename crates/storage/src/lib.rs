//! Versioned storage for proof-of-possession key records.
//!
//! This crate provides the byte-level [`StorageBackend`] abstraction and the
//! two domain stores the lifecycle engine is built on: the versioned key
//! store ([`keys::PopKeyStore`]) and the write-once assertion store
//! ([`blob::AssertionBlobStore`]).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Lifecycle Engine                         │
//! │       (reserve, activate, revoke, generate access params)   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │        PopKeyStore           │     AssertionBlobStore       │
//! │ (version chains, TTL rules)  │   (write-once by file name)  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                     StorageBackend trait                    │
//! │   (get, set_with_ttl, compare_and_set, get_range, delete)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ MemoryBackend (testing) │ document store adapters           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use lollipop_storage::{
//!     BackendPopKeyStore, KeyStoreConfig, MemoryBackend,
//!     keys::{AssertionRef, PopKey, PopKeyStore},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = BackendPopKeyStore::new(MemoryBackend::new(), KeyStoreConfig::default())?;
//!     let assertion_ref = AssertionRef::parse("sha512-abc")?;
//!
//!     let created = store.create(PopKey::pending(assertion_ref.clone(), "eyJrdHkiOiJPS1AifQ")).await?;
//!     assert_eq!(created.version, 0);
//!
//!     let latest = store.find_latest(&assertion_ref).await?;
//!     assert_eq!(latest.map(|r| r.version), Some(0));
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with fault-injecting store wrappers, record
//!   generators and assertion macros. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod blob;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use backend::{KeyValue, StorageBackend};
pub use blob::{AssertionBlobStore, BackendBlobStore, BlobError};
pub use config::KeyStoreConfig;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use keys::{BackendPopKeyStore, KeyStoreError, KeyStoreResult, PopKeyStore};
pub use memory::MemoryBackend;
