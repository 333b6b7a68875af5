//! Proof-of-possession key records and their versioned store.
//!
//! - [`assertion`]: validated identifier, owner and file-name grammars
//! - [`record`]: the tagged [`PopKey`] record and its stored envelope
//! - [`store`]: the [`PopKeyStore`] contract and its backend implementation
//! - [`error`]: the [`KeyStoreError`] taxonomy

pub mod assertion;
pub mod error;
pub mod record;
pub mod store;

pub use assertion::{
    AssertionFileName, AssertionRef, AssertionType, FiscalCode, GrammarError, HashAlgorithm,
};
pub use error::{KeyStoreError, KeyStoreResult};
pub use record::{ActivatedPopKey, KeyStatus, PendingPopKey, PopKey, StoredPopKey};
pub use store::{BackendPopKeyStore, PopKeyStore, next_ttl};
