//! The production [`ReplicatedStore`] backend, built on `etcd-client`.
//!
//! etcd is the replicated KV store this core embeds. It already provides
//! linearizable reads/writes, multi-op transactions, guarded
//! (compare-and-swap) transactions, prefix watches with previous-value
//! delivery, and member management, so this file is a thin adapter rather
//! than a reimplementation.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, Txn as EtcdTxn,
    TxnOp as EtcdTxnOp, WatchOptions,
};

use super::{Entry, Member, Op, ReplicatedStore, StoreClientFactory, Txn, TxnResponse, WatchEvent, WatchSubscription};
use crate::error::{CoreError, Result};

fn store_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::StoreUnavailable(e.to_string())
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = std::result::Result<T, etcd_client::Error>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(store_err(e)),
        Err(_) => Err(CoreError::StoreUnavailable(format!(
            "operation did not complete within {timeout:?}"
        ))),
    }
}

/// One connection to the replicated store, good for a single logical
/// caller. Metadata API call sites obtain one of these per call via
/// [`EtcdStoreFactory`] and drop it on return.
pub struct EtcdStore {
    client: Client,
    timeout: Duration,
}

impl EtcdStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

fn to_etcd_op(op: Op) -> EtcdTxnOp {
    match op {
        Op::Put(k, v) => EtcdTxnOp::put(k, v, None),
        Op::Get(k) => EtcdTxnOp::get(k, None),
        Op::Delete(k) => EtcdTxnOp::delete(k, None),
    }
}

#[async_trait]
impl ReplicatedStore for EtcdStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        with_timeout(self.timeout, async move {
            client.put(key, value, None).await.map(|_| ())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let mut client = self.client.clone();
        let key_owned = key.to_string();
        let resp = with_timeout(self.timeout, async move { client.get(key_owned, None).await }).await?;
        Ok(resp.kvs().first().map(|kv| Entry {
            key: String::from_utf8_lossy(kv.key()).into_owned(),
            value: kv.value().to_vec(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        with_timeout(self.timeout, async move { client.delete(key, None).await.map(|_| ()) }).await
    }

    async fn range_prefix(&self, prefix: &str) -> Result<Vec<Entry>> {
        let mut client = self.client.clone();
        let prefix_owned = prefix.to_string();
        let resp = with_timeout(self.timeout, async move {
            client
                .get(prefix_owned, Some(GetOptions::new().with_prefix()))
                .await
        })
        .await?;
        let mut entries: Vec<Entry> = resp
            .kvs()
            .iter()
            .map(|kv| Entry {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: kv.value().to_vec(),
            })
            .collect();
        entries.sort_by(|a, b| b.key.cmp(&a.key));
        Ok(entries)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let mut client = self.client.clone();
        let then: Vec<EtcdTxnOp> = txn.then.into_iter().map(to_etcd_op).collect();
        let or_else: Vec<EtcdTxnOp> = txn.or_else.into_iter().map(to_etcd_op).collect();
        let mut etcd_txn = EtcdTxn::new();
        if let Some((key, value)) = txn.guard {
            etcd_txn = etcd_txn.when(vec![Compare::value(key, CompareOp::Equal, value)]);
        }
        etcd_txn = etcd_txn.and_then(then).or_else(or_else);

        let resp = with_timeout(self.timeout, async move { client.txn(etcd_txn).await }).await?;
        let succeeded = resp.succeeded();
        let mut gets = Vec::new();
        for op_resp in resp.op_responses() {
            if let etcd_client::TxnOpResponse::Get(get_resp) = op_resp {
                for kv in get_resp.kvs() {
                    gets.push(Entry {
                        key: String::from_utf8_lossy(kv.key()).into_owned(),
                        value: kv.value().to_vec(),
                    });
                }
            }
        }
        Ok(TxnResponse { succeeded, gets })
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<Box<dyn WatchSubscription>> {
        let mut client = self.client.clone();
        let options = WatchOptions::new().with_prefix().with_prev_key();
        let (_watcher, stream) = client
            .watch(prefix.to_string(), Some(options))
            .await
            .map_err(store_err)?;
        Ok(Box::new(EtcdWatchSubscription {
            _watcher,
            stream,
        }))
    }

    async fn member_list(&self) -> Result<Vec<Member>> {
        let mut client = self.client.clone();
        let resp = with_timeout(self.timeout, async move { client.member_list().await }).await?;
        Ok(resp
            .members()
            .iter()
            .map(|m| Member {
                id: m.id(),
                name: m.name().to_string(),
                peer_urls: m.peer_ur_ls().iter().map(|s| s.to_string()).collect(),
            })
            .collect())
    }

    async fn member_add(&self, peer_url: &str) -> Result<Member> {
        let mut client = self.client.clone();
        let peer_url_owned = peer_url.to_string();
        let resp = with_timeout(self.timeout, async move {
            client.member_add(vec![peer_url_owned], None).await
        })
        .await?;
        let member = resp.member().ok_or_else(|| {
            CoreError::StoreUnavailable("member_add returned no member".to_string())
        })?;
        Ok(Member {
            id: member.id(),
            name: member.name().to_string(),
            peer_urls: member.peer_ur_ls().iter().map(|s| s.to_string()).collect(),
        })
    }

    async fn member_remove(&self, member_id: u64) -> Result<()> {
        let mut client = self.client.clone();
        with_timeout(self.timeout, async move {
            client.member_remove(member_id).await.map(|_| ())
        })
        .await
    }
}

struct EtcdWatchSubscription {
    _watcher: etcd_client::Watcher,
    stream: etcd_client::WatchStream,
}

#[async_trait]
impl WatchSubscription for EtcdWatchSubscription {
    async fn next(&mut self) -> Result<Option<WatchEvent>> {
        loop {
            let resp = self.stream.message().await.map_err(store_err)?;
            let Some(resp) = resp else { return Ok(None) };
            if let Some(event) = resp.events().first() {
                let Some(kv) = event.kv() else { continue };
                let key = String::from_utf8_lossy(kv.key()).into_owned();
                let prev = event.prev_kv().map(|kv| kv.value().to_vec());
                return Ok(Some(match event.event_type() {
                    EventType::Put => WatchEvent::Put {
                        key,
                        value: kv.value().to_vec(),
                        prev,
                    },
                    EventType::Delete => WatchEvent::Delete { key, prev },
                }));
            }
        }
    }
}

/// Builds a fresh [`EtcdStore`] (and therefore a fresh underlying
/// connection) on every call, so Metadata API call sites never reuse a
/// connection across leader changes.
pub struct EtcdStoreFactory {
    endpoints: Vec<String>,
    options: Option<ConnectOptions>,
    timeout: Duration,
}

impl EtcdStoreFactory {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self {
            endpoints,
            options: None,
            timeout,
        }
    }
}

#[async_trait]
impl StoreClientFactory for EtcdStoreFactory {
    async fn connect(&self) -> Result<Box<dyn ReplicatedStore>> {
        let client = Client::connect(&self.endpoints, self.options.clone())
            .await
            .map_err(store_err)?;
        Ok(Box::new(EtcdStore::new(client, self.timeout)))
    }
}
