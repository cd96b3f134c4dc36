//! Farol Store - Persistent store adapter
//!
//! This crate abstracts the persistent KV backend behind the `KvStore`
//! trait: revisioned gets/ranges, compare-and-swap transactions and a
//! gapless, resumable watch stream over hierarchical keys.
//!
//! The in-memory backend ships here; it backs standalone deployments and
//! every test in the workspace.

pub mod keys;
pub mod kv;
pub mod lock;
pub mod memory;
pub mod retry;

pub use kv::{
    Compare, CompareResult, CompareTarget, EventType, KeyValue, KvStore, RangeResponse,
    StoreError, StoreResult, TxnOp, TxnResponse, WatchEvent, Watcher,
};
pub use lock::DistLock;
pub use memory::MemoryStore;
pub use retry::with_retry;
