//! An in-memory [`ReplicatedStore`] used as a test double.
//!
//! Mirrors etcd's observable semantics closely enough to drive the watcher
//! state machine and Metadata API deterministically in tests: prefix range
//! reads sorted descending, guarded transactions, and ordered prefix
//! watches with previous-value delivery.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{Entry, Member, Op, ReplicatedStore, StoreClientFactory, Txn, TxnResponse, WatchEvent, WatchSubscription};
use crate::error::{CoreError, Result};

struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    members: Vec<Member>,
    next_member_id: u64,
    watchers: Vec<(String, mpsc::UnboundedSender<WatchEvent>)>,
}

impl Inner {
    fn notify(&mut self, event: WatchEvent) {
        let key = event.key().to_string();
        self.watchers
            .retain(|(prefix, tx)| !key.starts_with(prefix.as_str()) || tx.send(event.clone()).is_ok());
    }

    fn apply_put(&mut self, key: &str, value: Vec<u8>) {
        let prev = self.data.insert(key.to_string(), value.clone());
        self.notify(WatchEvent::Put {
            key: key.to_string(),
            value,
            prev,
        });
    }

    fn apply_delete(&mut self, key: &str) {
        if let Some(prev) = self.data.remove(key) {
            self.notify(WatchEvent::Delete {
                key: key.to_string(),
                prev: Some(prev),
            });
        }
    }

    fn apply_ops(&mut self, ops: &[Op]) -> Vec<Entry> {
        let mut gets = Vec::new();
        for op in ops {
            match op {
                Op::Put(k, v) => self.apply_put(k, v.clone()),
                Op::Delete(k) => self.apply_delete(k),
                Op::Get(k) => {
                    if let Some(v) = self.data.get(k) {
                        gets.push(Entry {
                            key: k.clone(),
                            value: v.clone(),
                        });
                    }
                }
            }
        }
        gets
    }
}

/// Shared in-memory store. Clone (or wrap in `Arc`) to share one logical
/// "cluster" across multiple simulated hosts in a test.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: BTreeMap::new(),
                members: Vec::new(),
                next_member_id: 1,
                watchers: Vec::new(),
            })),
        }
    }

    /// A [`StoreClientFactory`] that hands out handles to this same shared
    /// store, emulating "fresh client per call" without a real connection.
    pub fn factory(&self) -> MemoryStoreFactory {
        MemoryStoreFactory { store: self.clone() }
    }
}

#[async_trait]
impl ReplicatedStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.lock().await.apply_put(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.inner.lock().await.data.get(key).map(|v| Entry {
            key: key.to_string(),
            value: v.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().await.apply_delete(key);
        Ok(())
    }

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<Entry>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Entry> = inner
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Entry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        out.sort_by(|a, b| b.key.cmp(&a.key));
        Ok(out)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let mut inner = self.inner.lock().await;
        let holds = match &txn.guard {
            Some((key, expected)) => inner.data.get(key).map(|v| v == expected).unwrap_or(false),
            None => true,
        };
        let ops = if holds { &txn.then } else { &txn.or_else };
        let gets = inner.apply_ops(ops);
        Ok(TxnResponse {
            succeeded: holds,
            gets,
        })
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<Box<dyn WatchSubscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.watchers.push((prefix.to_string(), tx));
        Ok(Box::new(MemoryWatchSubscription { rx }))
    }

    async fn member_list(&self) -> Result<Vec<Member>> {
        Ok(self.inner.lock().await.members.clone())
    }

    async fn member_add(&self, peer_url: &str) -> Result<Member> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_member_id;
        inner.next_member_id += 1;
        let member = Member {
            id,
            name: String::new(),
            peer_urls: vec![peer_url.to_string()],
        };
        inner.members.push(member.clone());
        Ok(member)
    }

    async fn member_remove(&self, member_id: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let before = inner.members.len();
        inner.members.retain(|m| m.id != member_id);
        if inner.members.len() == before {
            return Err(CoreError::StoreUnavailable(format!(
                "member {member_id} not found"
            )));
        }
        Ok(())
    }
}

struct MemoryWatchSubscription {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

#[async_trait]
impl WatchSubscription for MemoryWatchSubscription {
    async fn next(&mut self) -> Result<Option<WatchEvent>> {
        Ok(self.rx.recv().await)
    }
}

/// [`StoreClientFactory`] for [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryStoreFactory {
    store: MemoryStore,
}

#[async_trait]
impl StoreClientFactory for MemoryStoreFactory {
    async fn connect(&self) -> Result<Box<dyn ReplicatedStore>> {
        Ok(Box::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"v");
    }

    #[tokio::test]
    async fn range_prefix_sorts_descending() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store.put(&format!("STATE:{name}"), b"Ready".to_vec()).await.unwrap();
        }
        let entries = store.range_prefix("STATE:").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec!["STATE:c", "STATE:b", "STATE:a"]);
    }

    #[tokio::test]
    async fn cas_fails_on_mismatch_and_runs_else_branch() {
        let store = MemoryStore::new();
        store.put("STATE:v1", b"Ready".to_vec()).await.unwrap();

        let txn = Txn::new()
            .when_value("STATE:v1", b"Mounted".to_vec())
            .and_then(vec![Op::Put("STATE:v1".into(), b"Intermediate".to_vec())])
            .or_else(vec![Op::Get("STATE:v1".into())]);
        let resp = store.txn(txn).await.unwrap();
        assert!(!resp.succeeded);
        assert_eq!(resp.gets[0].value, b"Ready");
        assert_eq!(store.get("STATE:v1").await.unwrap().unwrap().value, b"Ready");
    }

    #[tokio::test]
    async fn watch_prefix_delivers_put_with_previous_value() {
        let store = MemoryStore::new();
        store.put("GREF:v1", b"0".to_vec()).await.unwrap();
        let mut sub = store.watch_prefix("GREF:").await.unwrap();
        store.put("GREF:v1", b"1".to_vec()).await.unwrap();

        let event = sub.next().await.unwrap().unwrap();
        match event {
            WatchEvent::Put { key, value, prev } => {
                assert_eq!(key, "GREF:v1");
                assert_eq!(value, b"1");
                assert_eq!(prev, Some(b"0".to_vec()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn member_add_then_remove() {
        let store = MemoryStore::new();
        let m = store.member_add("http://host:2380").await.unwrap();
        assert_eq!(store.member_list().await.unwrap().len(), 1);
        store.member_remove(m.id).await.unwrap();
        assert!(store.member_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn member_remove_unknown_id_fails() {
        let store = MemoryStore::new();
        assert!(store.member_remove(999).await.is_err());
    }
}
