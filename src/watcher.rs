//! Refcount Watcher + SMB-lifecycle state machine.
//!
//! Subscribes to the `GREF:` prefix with previous-value delivery and drives
//! each volume through `Ready <-> Intermediate <-> Mounted`/`Error` by racing
//! a compare-and-swap against every other host's watcher. The CAS itself is
//! the serialization point: exactly one host ever performs the SMB side
//! effect per refcount boundary.

use crate::config::Config;
use crate::metadata::MetadataApi;
use crate::smb::SmbController;
use crate::state::VolumeState;
use crate::store::{StoreClientFactory, WatchEvent, WatchSubscription};

/// Runs the watcher loop until the subscription closes or `cancel` fires.
/// Demoting a manager to worker should close the store client backing the
/// subscription. Wiring a role-change detector to fire `cancel` is left to
/// the caller; this function only reacts to `cancel` and to the
/// subscription itself ending.
pub async fn run(
    config: &Config,
    metadata: &MetadataApi,
    smb: &dyn SmbController,
    factory: &dyn StoreClientFactory,
    mut cancel: tokio::sync::oneshot::Receiver<()>,
) -> crate::error::Result<()> {
    let store = factory.connect().await?;
    let mut sub = store.watch_prefix(&config.key_prefixes.gref).await?;

    loop {
        let event = tokio::select! {
            event = sub.next() => event?,
            _ = &mut cancel => {
                log::info!("watcher: cancelled, closing store client");
                return Ok(());
            }
        };

        let Some(event) = event else {
            log::info!("watcher: subscription closed by server");
            return Ok(());
        };

        if let Some((volume, from, to)) = boundary_transition(config, &event) {
            handle_transition(metadata, smb, &volume, from, to).await;
        }
    }
}

/// Extracts a qualifying `0<->1` boundary transition from a watch event, or
/// `None` if this event should be ignored. Only Put events where both value
/// and prev_value are set and represent the boundary are acted on.
fn boundary_transition(config: &Config, event: &WatchEvent) -> Option<(String, &'static str, &'static str)> {
    let WatchEvent::Put { key, value, prev: Some(prev) } = event else {
        return None;
    };
    let volume = config.key_prefixes.strip_gref(key)?;
    match (prev.as_slice(), value.as_slice()) {
        (b"0", b"1") => Some((volume, "0", "1")),
        (b"1", b"0") => Some((volume, "1", "0")),
        _ => None,
    }
}

async fn handle_transition(metadata: &MetadataApi, smb: &dyn SmbController, volume: &str, from: &str, to: &str) {
    match (from, to) {
        ("0", "1") => transition_a(metadata, smb, volume).await,
        ("1", "0") => transition_b(metadata, smb, volume).await,
        _ => unreachable!("boundary_transition only yields 0->1 or 1->0"),
    }
}

/// Transition A: first mounter arrived (`0 → 1`).
async fn transition_a(metadata: &MetadataApi, smb: &dyn SmbController, volume: &str) {
    let state_key = metadata.state_key(volume);
    let won = metadata
        .compare_and_put(&state_key, VolumeState::Ready.as_str().as_bytes().to_vec(), VolumeState::Intermediate.as_str().as_bytes().to_vec())
        .await;
    if !won {
        return;
    }

    if smb.start(volume).await {
        let settled = metadata
            .compare_and_put(&state_key, VolumeState::Intermediate.as_str().as_bytes().to_vec(), VolumeState::Mounted.as_str().as_bytes().to_vec())
            .await;
        if !settled {
            log::error!("watcher: {volume}: Intermediate->Mounted CAS failed unexpectedly, parking in Error");
            metadata
                .compare_and_put(&state_key, VolumeState::Intermediate.as_str().as_bytes().to_vec(), VolumeState::Error.as_str().as_bytes().to_vec())
                .await;
        }
    } else {
        log::error!("watcher: {volume}: SMB.Start failed, parking in Error");
        metadata
            .compare_and_put(&state_key, VolumeState::Intermediate.as_str().as_bytes().to_vec(), VolumeState::Error.as_str().as_bytes().to_vec())
            .await;
    }
}

/// Transition B: last unmounter left (`1 → 0`), symmetric to Transition A.
async fn transition_b(metadata: &MetadataApi, smb: &dyn SmbController, volume: &str) {
    let state_key = metadata.state_key(volume);
    let won = metadata
        .compare_and_put(&state_key, VolumeState::Mounted.as_str().as_bytes().to_vec(), VolumeState::Intermediate.as_str().as_bytes().to_vec())
        .await;
    if !won {
        return;
    }

    if smb.stop(volume).await {
        let settled = metadata
            .compare_and_put(&state_key, VolumeState::Intermediate.as_str().as_bytes().to_vec(), VolumeState::Ready.as_str().as_bytes().to_vec())
            .await;
        if !settled {
            log::error!("watcher: {volume}: Intermediate->Ready CAS failed unexpectedly, parking in Error");
            metadata
                .compare_and_put(&state_key, VolumeState::Intermediate.as_str().as_bytes().to_vec(), VolumeState::Error.as_str().as_bytes().to_vec())
                .await;
        }
    } else {
        log::error!("watcher: {volume}: SMB.Stop failed, parking in Error");
        metadata
            .compare_and_put(&state_key, VolumeState::Intermediate.as_str().as_bytes().to_vec(), VolumeState::Error.as_str().as_bytes().to_vec())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::ReplicatedStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSmb {
        start_calls: Arc<AtomicUsize>,
        stop_calls: Arc<AtomicUsize>,
        start_result: bool,
        stop_result: bool,
    }

    #[async_trait::async_trait]
    impl SmbController for CountingSmb {
        async fn start(&self, _volume: &str) -> bool {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start_result
        }
        async fn stop(&self, _volume: &str) -> bool {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stop_result
        }
    }

    async fn seeded(volume: &str, state: VolumeState, gref: &str) -> (MemoryStore, MetadataApi) {
        let backing = MemoryStore::new();
        backing.put(&format!("STATE:{volume}"), state.as_str().as_bytes().to_vec()).await.unwrap();
        backing.put(&format!("GREF:{volume}"), gref.as_bytes().to_vec()).await.unwrap();
        let metadata = MetadataApi::new(Config::default(), Box::new(backing.factory()));
        (backing, metadata)
    }

    #[tokio::test]
    async fn single_host_first_mount_starts_smb_and_settles_mounted() {
        let (backing, metadata) = seeded("v1", VolumeState::Ready, "0").await;
        let smb = CountingSmb {
            start_calls: Arc::new(AtomicUsize::new(0)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            start_result: true,
            stop_result: true,
        };

        backing.put("GREF:v1", b"1".to_vec()).await.unwrap();
        transition_a(&metadata, &smb, "v1").await;

        assert_eq!(smb.start_calls.load(Ordering::SeqCst), 1);
        let state = backing.get("STATE:v1").await.unwrap().unwrap();
        assert_eq!(state.value, b"Mounted");
    }

    #[tokio::test]
    async fn two_host_race_only_one_smb_start() {
        let (_backing, metadata) = seeded("v2", VolumeState::Ready, "0").await;
        let smb = CountingSmb {
            start_calls: Arc::new(AtomicUsize::new(0)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            start_result: true,
            stop_result: true,
        };

        transition_a(&metadata, &smb, "v2").await;
        transition_a(&metadata, &smb, "v2").await;

        assert_eq!(smb.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn smb_start_failure_parks_in_error() {
        let (backing, metadata) = seeded("v3", VolumeState::Ready, "0").await;
        let smb = CountingSmb {
            start_calls: Arc::new(AtomicUsize::new(0)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            start_result: false,
            stop_result: true,
        };

        transition_a(&metadata, &smb, "v3").await;

        let state = backing.get("STATE:v3").await.unwrap().unwrap();
        assert_eq!(state.value, b"Error");
    }

    #[tokio::test]
    async fn clean_last_unmount_stops_smb_and_settles_ready() {
        let (backing, metadata) = seeded("v4", VolumeState::Mounted, "1").await;
        let smb = CountingSmb {
            start_calls: Arc::new(AtomicUsize::new(0)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            start_result: true,
            stop_result: true,
        };

        transition_b(&metadata, &smb, "v4").await;

        assert_eq!(smb.stop_calls.load(Ordering::SeqCst), 1);
        let state = backing.get("STATE:v4").await.unwrap().unwrap();
        assert_eq!(state.value, b"Ready");
    }

    #[test]
    fn boundary_transition_filters_non_boundary_events() {
        let config = Config::default();
        let ignored = WatchEvent::Put { key: "GREF:v5".to_string(), value: b"2".to_vec(), prev: Some(b"1".to_vec()) };
        assert!(boundary_transition(&config, &ignored).is_none());

        let no_prev = WatchEvent::Put { key: "GREF:v5".to_string(), value: b"1".to_vec(), prev: None };
        assert!(boundary_transition(&config, &no_prev).is_none());

        let deletion = WatchEvent::Delete { key: "GREF:v5".to_string(), prev: Some(b"0".to_vec()) };
        assert!(boundary_transition(&config, &deletion).is_none());

        let rising = WatchEvent::Put { key: "GREF:v5".to_string(), value: b"1".to_vec(), prev: Some(b"0".to_vec()) };
        assert_eq!(boundary_transition(&config, &rising), Some(("v5".to_string(), "0", "1")));
    }
}
