//! The Replicated KV Store capability set.
//!
//! `ReplicatedStore` is the stable interface the rest of the core codes
//! against: any store satisfying this trait is a legal backend. [`etcd`]
//! is the production implementation; [`memory`] is an in-process test
//! double used throughout this crate's unit tests.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

/// A single key/value pair as returned by `get`/`range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
}

/// One operation inside a [`Txn`].
#[derive(Debug, Clone)]
pub enum Op {
    Put(String, Vec<u8>),
    Get(String),
    Delete(String),
}

/// A batch of operations applied atomically, optionally guarded by an
/// `If(value(K) == V)` predicate (a compare-and-swap).
#[derive(Debug, Clone, Default)]
pub struct Txn {
    pub guard: Option<(String, Vec<u8>)>,
    pub then: Vec<Op>,
    pub or_else: Vec<Op>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when_value(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.guard = Some((key.into(), value.into()));
        self
    }

    pub fn and_then(mut self, ops: Vec<Op>) -> Self {
        self.then = ops;
        self
    }

    pub fn or_else(mut self, ops: Vec<Op>) -> Self {
        self.or_else = ops;
        self
    }
}

/// The result of executing a [`Txn`]: whether the guard predicate held, plus
/// any `Get` results from whichever branch ran.
#[derive(Debug, Clone, Default)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub gets: Vec<Entry>,
}

/// An event delivered by a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created or overwritten. `prev` carries the key's value
    /// immediately before this write, if the key previously existed.
    Put {
        key: String,
        value: Vec<u8>,
        prev: Option<Vec<u8>>,
    },
    /// A key was removed. `prev` carries its value immediately before
    /// deletion, if known.
    Delete { key: String, prev: Option<Vec<u8>> },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } => key,
            WatchEvent::Delete { key, .. } => key,
        }
    }
}

/// A cluster member as reported by the store's member-management API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u64,
    /// Empty when the member was reserved via `MemberAdd` but has not yet
    /// started and announced itself (the stale-reservation case).
    pub name: String,
    pub peer_urls: Vec<String>,
}

/// A subscription to a prefix watch. Dropping it (or the underlying store
/// client) ends the subscription.
#[async_trait]
pub trait WatchSubscription: Send {
    /// Awaits the next event. Returns `Ok(None)` when the watch has been
    /// closed by the server or the subscription was cancelled.
    async fn next(&mut self) -> Result<Option<WatchEvent>>;
}

/// The Replicated KV Store capability set exposed to the rest of the core.
#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Entry>>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Range read over all keys with the given prefix, sorted descending
    /// by key.
    async fn range_prefix(&self, prefix: &str) -> Result<Vec<Entry>>;

    /// Executes a transaction (guarded or unconditional, depending on
    /// whether [`Txn::guard`] is set).
    async fn txn(&self, txn: Txn) -> Result<TxnResponse>;

    /// Subscribes to a prefix watch with previous-value delivery enabled.
    async fn watch_prefix(&self, prefix: &str) -> Result<Box<dyn WatchSubscription>>;

    async fn member_list(&self) -> Result<Vec<Member>>;
    async fn member_add(&self, peer_url: &str) -> Result<Member>;
    async fn member_remove(&self, member_id: u64) -> Result<()>;
}

/// Produces a fresh [`ReplicatedStore`] handle per call.
///
/// Metadata API operations create a fresh store client per call and
/// release it on return, trading connection-reuse performance for
/// robustness against stale connections across leader changes. This trait
/// is the seam that lets `metadata::MetadataApi` do that without being
/// wired to a specific client type.
#[async_trait]
pub trait StoreClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ReplicatedStore>>;
}
