//! Disk-tier persistence for built indices.
//!
//! One directory per cache key under a configured root; see
//! [`store::PersistentStore`] for the layout and atomicity guarantees.

pub mod store;

pub use store::{PersistedEntry, PersistentStore, STORE_FORMAT_VERSION, StoreMetadata};
