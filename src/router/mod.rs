//! Credential Selection and Rotation
//!
//! Key store, round-robin pool, and the tiered rotation scheduler.

pub mod key_store;
pub mod pool;
pub mod rotator;

pub use key_store::{KeySnapshot, KeyStatus, KeyStore, RotationDocument, Selector};
pub use pool::{CredentialPool, PoolEntryStatus};
pub use rotator::{classify, FailureClass, Rotator};
