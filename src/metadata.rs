//! Metadata API: the typed facade over the Replicated KV Store that
//! external volume-driver HTTP handlers call into.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::state::validate_volume_name;
use crate::store::{Entry, Op, StoreClientFactory, Txn};

/// One `(key, value)` pair to write, already keyed with its full prefix
/// (e.g. `STATE:myvol`).
#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Typed facade over the Replicated KV Store for per-volume metadata.
///
/// Every method opens a fresh store client via `factory` and lets it drop
/// on return, trading connection reuse for robustness against stale
/// connections across leader changes.
pub struct MetadataApi {
    config: Config,
    factory: Box<dyn StoreClientFactory>,
}

impl MetadataApi {
    pub fn new(config: Config, factory: Box<dyn StoreClientFactory>) -> Self {
        Self { config, factory }
    }

    /// The full `STATE:` key for a volume, for callers (the watcher) that
    /// need to name it directly in a `compare_and_put` call.
    pub fn state_key(&self, volume: &str) -> String {
        self.config.key_prefixes.state_key(volume)
    }

    /// Writes one or more entries. A single entry is a plain Put; more than
    /// one is issued as a single transaction so the write is atomic. Each
    /// entry's key is validated against the same opaque-identifier rule
    /// `read_vol_metadata`/`delete_vol_metadata` enforce, for any key that
    /// carries one of the three recognized prefixes.
    pub async fn write_vol_metadata(&self, entries: Vec<MetadataEntry>) -> Result<()> {
        for entry in &entries {
            self.validate_entry_key(&entry.key)?;
        }
        let store = self.factory.connect().await?;
        if entries.len() == 1 {
            let entry = &entries[0];
            store.put(&entry.key, entry.value.clone()).await?;
            return Ok(());
        }
        let ops = entries
            .into_iter()
            .map(|e| Op::Put(e.key, e.value))
            .collect();
        store.txn(Txn::new().and_then(ops)).await?;
        Ok(())
    }

    /// Validates the volume-name portion of a key, for whichever of the
    /// three recognized prefixes it carries. Keys with none of the
    /// recognized prefixes are left alone.
    fn validate_entry_key(&self, key: &str) -> Result<()> {
        let prefixes = &self.config.key_prefixes;
        let volume = prefixes
            .strip_state(key)
            .or_else(|| prefixes.strip_gref(key))
            .or_else(|| prefixes.strip_info(key));
        match volume {
            Some(volume) => validate_volume_name(&volume),
            None => Ok(()),
        }
    }

    /// Reads every key in `keys` in one transaction. Fails with
    /// `VolumeDoesNotExist` if all are missing. If some but not all are
    /// missing, the data model's atomicity invariant has been violated,
    /// which is a programming error, and the process aborts.
    pub async fn read_vol_metadata(&self, volume: &str, keys: Vec<String>) -> Result<Vec<Entry>> {
        validate_volume_name(volume)?;
        let store = self.factory.connect().await?;
        let ops: Vec<Op> = keys.iter().cloned().map(Op::Get).collect();
        let resp = store.txn(Txn::new().and_then(ops)).await?;

        if resp.gets.is_empty() {
            return Err(CoreError::VolumeDoesNotExist(volume.to_string()));
        }
        if resp.gets.len() != keys.len() {
            panic!(
                "metadata corrupt for volume {volume}: expected {} keys, found {}",
                keys.len(),
                resp.gets.len()
            );
        }
        Ok(resp.gets)
    }

    /// Deletes `STATE:name`, `GREF:name`, `INFO:name` in one transaction.
    /// Succeeds silently if some or all keys are already absent.
    pub async fn delete_vol_metadata(&self, volume: &str) -> Result<()> {
        validate_volume_name(volume)?;
        let store = self.factory.connect().await?;
        let prefixes = &self.config.key_prefixes;
        let ops = vec![
            Op::Delete(prefixes.state_key(volume)),
            Op::Delete(prefixes.gref_key(volume)),
            Op::Delete(prefixes.info_key(volume)),
        ];
        store.txn(Txn::new().and_then(ops)).await?;
        Ok(())
    }

    /// Range-scans keys with the `STATE:` prefix, strips the prefix, and
    /// returns volume names sorted descending by full key.
    pub async fn list_volume_name(&self) -> Result<Vec<String>> {
        let store = self.factory.connect().await?;
        let entries = store.range_prefix(&self.config.key_prefixes.state).await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| self.config.key_prefixes.strip_state(&e.key))
            .collect())
    }

    /// Guarded transaction: swap `key` from `old_val` to `new_val` iff its
    /// current value equals `old_val`. Returns whether the swap occurred.
    /// Swallows store errors, returning `false` and logging the cause,
    /// rather than surfacing them to the caller.
    pub async fn compare_and_put(&self, key: &str, old_val: Vec<u8>, new_val: Vec<u8>) -> bool {
        if let Err(e) = self.validate_entry_key(key) {
            log::warn!("compare_and_put({key}): {e}");
            return false;
        }
        let store = match self.factory.connect().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("compare_and_put({key}): failed to connect to store: {e}");
                return false;
            }
        };
        let txn = Txn::new()
            .when_value(key, old_val)
            .and_then(vec![Op::Put(key.to_string(), new_val)]);
        match store.txn(txn).await {
            Ok(resp) => {
                if resp.succeeded {
                    log::info!("compare_and_put({key}): swap succeeded");
                } else {
                    log::info!("compare_and_put({key}): lost the race, no side effect");
                }
                resp.succeeded
            }
            Err(e) => {
                log::warn!("compare_and_put({key}): store error: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::ReplicatedStore;

    fn api() -> (MemoryStore, MetadataApi) {
        let backing = MemoryStore::new();
        let api = MetadataApi::new(Config::default(), Box::new(backing.factory()));
        (backing, api)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_backing, api) = api();
        api.write_vol_metadata(vec![
            MetadataEntry { key: "STATE:v1".to_string(), value: b"Ready".to_vec() },
            MetadataEntry { key: "GREF:v1".to_string(), value: b"0".to_vec() },
        ])
        .await
        .unwrap();

        let got = api
            .read_vol_metadata("v1", vec!["STATE:v1".to_string(), "GREF:v1".to_string()])
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn read_missing_volume_fails_with_does_not_exist() {
        let (_backing, api) = api();
        let err = api
            .read_vol_metadata("ghost", vec!["STATE:ghost".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::VolumeDoesNotExist(_)));
    }

    #[tokio::test]
    async fn delete_then_read_fails_with_does_not_exist() {
        let (_backing, api) = api();
        api.write_vol_metadata(vec![MetadataEntry { key: "STATE:v2".to_string(), value: b"Ready".to_vec() }])
            .await
            .unwrap();
        api.delete_vol_metadata("v2").await.unwrap();

        let err = api
            .read_vol_metadata("v2", vec!["STATE:v2".to_string(), "GREF:v2".to_string(), "INFO:v2".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::VolumeDoesNotExist(_)));
    }

    #[tokio::test]
    async fn list_volume_name_sorts_descending() {
        let (_backing, api) = api();
        for name in ["alpha", "beta", "gamma"] {
            api.write_vol_metadata(vec![MetadataEntry { key: format!("STATE:{name}"), value: b"Ready".to_vec() }])
                .await
                .unwrap();
        }
        assert_eq!(api.list_volume_name().await.unwrap(), vec!["gamma", "beta", "alpha"]);
    }

    #[tokio::test]
    async fn compare_and_put_reports_success_and_failure() {
        let (_backing, api) = api();
        api.write_vol_metadata(vec![MetadataEntry { key: "STATE:v3".to_string(), value: b"Ready".to_vec() }])
            .await
            .unwrap();

        assert!(api.compare_and_put("STATE:v3", b"Ready".to_vec(), b"Intermediate".to_vec()).await);
        assert!(!api.compare_and_put("STATE:v3", b"Ready".to_vec(), b"Intermediate".to_vec()).await);
    }

    #[tokio::test]
    #[should_panic(expected = "metadata corrupt")]
    async fn partial_read_panics() {
        let (backing, api) = api();
        backing.put("STATE:v4", b"Ready".to_vec()).await.unwrap();
        let _ = api
            .read_vol_metadata("v4", vec!["STATE:v4".to_string(), "GREF:v4".to_string(), "INFO:v4".to_string()])
            .await;
    }
}
