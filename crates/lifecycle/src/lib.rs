//! # Lollipop Lifecycle
//!
//! The reserve, activate and revoke lifecycle of proof-of-possession keys.
//!
//! [`LifecycleEngine`] drives the versioned key store and the assertion store
//! through each transition, keeps a key's master and used records in step,
//! mints access tokens for valid keys and authenticates signed requests
//! against them.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lollipop_lifecycle::{ActivationRequest, LifecycleEngine};
//! use lollipop_storage::{BackendBlobStore, BackendPopKeyStore, KeyStoreConfig, MemoryBackend, keys::HashAlgorithm};
//! # use lollipop_authn::token::TokenService;
//!
//! # async fn example(tokens: Arc<dyn TokenService>, jwk: &str, activation: ActivationRequest)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let engine = LifecycleEngine::builder()
//!     .keys(Arc::new(BackendPopKeyStore::new(backend.clone(), KeyStoreConfig::default())?))
//!     .assertions(Arc::new(BackendBlobStore::new(backend)))
//!     .tokens(tokens)
//!     .build()?;
//!
//! let reservation = engine.reserve(jwk, HashAlgorithm::Sha256).await?;
//! let activated = engine.activate(activation).await?;
//! let params = engine.generate_access_params(activated.key.assertion_ref(), "op-1").await?;
//! engine.revoke(reservation.requested().key.assertion_ref()).await?;
//! # let _ = params;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`failpoints`**: Enables the `activate-before-used-upsert` fail point.
//! - **`testutil`**: Enables the `testutil` module with an engine harness over fault-injecting
//!   in-memory stores.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use config::{LifecycleConfig, RetryPolicyConfig};
pub use engine::{AccessParams, ActivationRequest, LifecycleEngine, Reservation};
pub use error::{LifecycleError, Result};
