//! Store adapter contract
//!
//! Keys are hierarchical `/`-separated text. Every mutation is stamped with
//! a revision from a single monotonically increasing counter; a transaction
//! applies its operations atomically and logs them in order. Watches
//! deliver events in revision order with no gaps and can resume from any
//! retained revision.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store adapter failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction precondition failed")]
    Conflict,

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("watch revision {0} has been compacted")]
    Compacted(i64),
}

/// A stored key-value pair with its revision history metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which the key was created.
    pub create_rev: i64,
    /// Revision of the latest modification.
    pub mod_rev: i64,
    /// Number of modifications since creation.
    pub version: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// A single change observed through a watch. Delete events carry the last
/// stored value so downstream indexes can unlink secondary keys.
#[derive(Clone, Debug)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub key: String,
    pub value: Vec<u8>,
    pub rev: i64,
}

#[derive(Clone, Debug, Default)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    /// Store revision the range was read at.
    pub rev: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    Greater,
    Less,
    NotEqual,
}

/// What a compare predicate inspects. Missing keys compare as revision 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompareTarget {
    ModRev(i64),
    CreateRev(i64),
    Version(i64),
    /// Number of keys under `Compare::key` taken as a prefix.
    PrefixCount(i64),
}

/// A transaction precondition.
#[derive(Clone, Debug)]
pub struct Compare {
    pub key: String,
    pub result: CompareResult,
    pub target: CompareTarget,
}

impl Compare {
    /// The key exists with exactly this modification revision.
    pub fn mod_rev_eq(key: impl Into<String>, rev: i64) -> Self {
        Compare {
            key: key.into(),
            result: CompareResult::Equal,
            target: CompareTarget::ModRev(rev),
        }
    }

    /// The key does not exist.
    pub fn absent(key: impl Into<String>) -> Self {
        Compare {
            key: key.into(),
            result: CompareResult::Equal,
            target: CompareTarget::CreateRev(0),
        }
    }

    /// The key exists (any revision).
    pub fn exists(key: impl Into<String>) -> Self {
        Compare {
            key: key.into(),
            result: CompareResult::Greater,
            target: CompareTarget::CreateRev(0),
        }
    }

    /// Exactly `count` keys share the given prefix.
    pub fn prefix_count_eq(prefix: impl Into<String>, count: i64) -> Self {
        Compare {
            key: prefix.into(),
            result: CompareResult::Equal,
            target: CompareTarget::PrefixCount(count),
        }
    }
}

/// A transaction operation.
#[derive(Clone, Debug)]
pub enum TxnOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
    DeletePrefix { prefix: String },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }

    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        TxnOp::DeletePrefix {
            prefix: prefix.into(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TxnResponse {
    pub succeeded: bool,
    /// Store revision after the transaction.
    pub rev: i64,
}

/// An open watch. Events arrive in revision order without gaps; the stream
/// ends when the store shuts down or the watcher falls below the retained
/// log (in which case the opener must re-range and resume).
pub struct Watcher {
    rx: mpsc::Receiver<WatchEvent>,
}

impl Watcher {
    pub fn new(rx: mpsc::Receiver<WatchEvent>) -> Self {
        Watcher { rx }
    }

    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// The capability set every persistent backend provides.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>>;

    async fn range(&self, prefix: &str) -> StoreResult<RangeResponse>;

    /// Returns the revision of the write.
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<i64>;

    /// Returns whether the key existed and the resulting store revision.
    async fn delete(&self, key: &str) -> StoreResult<(bool, i64)>;

    async fn txn(
        &self,
        compares: Vec<Compare>,
        success: Vec<TxnOp>,
        failure: Vec<TxnOp>,
    ) -> StoreResult<TxnResponse>;

    /// Opens a watch over `prefix` delivering events with revision
    /// strictly greater than `from_rev`.
    async fn watch(&self, prefix: &str, from_rev: i64) -> StoreResult<Watcher>;

    /// Highest revision the store has assigned so far.
    async fn highest_rev(&self) -> i64;
}
