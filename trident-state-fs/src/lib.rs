#![deny(missing_docs)]
//! File-backed and hybrid `SessionStore` implementations for trident.
//!
//! [`FsStore`] persists one JSON file per session id under `sessions/`,
//! `conversations/`, and `events/`, writing through a temp file and an
//! atomic rename. [`HybridStore`] layers the in-memory store over it
//! for memory-speed reads with durable writes.

mod fs_store;
mod hybrid;

pub use fs_store::FsStore;
pub use hybrid::HybridStore;
pub use trident_state_memory::StoreConfig;
