//! Volume Cache Reconciler
//!
//! Keeps an eventually-consistent mirror of the UDX-enabled buckets visible
//! to the agent and announces deltas on the event channel.
//!
//! The cache is a single-writer cell holding an immutable snapshot. A pass
//! builds a fresh snapshot, enqueues one event per difference and only then
//! swaps the snapshot in, so a consumer never sees events that are ahead of
//! the cache it can read.

use crate::domain::model::{Device, Volume, VolumeEvent, UDX_TAG_ENABLED, UDX_TAG_KEY};
use crate::domain::ports::{BucketTags, ObjectStorageClientRef, VolumeStore};
use crate::error::{Error, Result};
use crate::metrics::UslMetrics;
use crate::volumes::events::EventSender;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Volumes keyed by their UUID
pub type VolumeSnapshot = BTreeMap<Uuid, Volume>;

// =============================================================================
// Snapshot Diff
// =============================================================================

/// Difference between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeDelta {
    /// Volumes present only in the fresh snapshot
    pub added: Vec<Volume>,
    /// UUIDs present only in the previous snapshot
    pub removed: Vec<Uuid>,
}

impl VolumeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Events announcing this delta
    pub fn into_events(self) -> Vec<VolumeEvent> {
        self.added
            .into_iter()
            .map(VolumeEvent::NewVolume)
            .chain(self.removed.into_iter().map(VolumeEvent::VolumeRemoved))
            .collect()
    }
}

/// Compute the set difference of two snapshots by UUID
pub fn diff_snapshots(previous: &VolumeSnapshot, fresh: &VolumeSnapshot) -> VolumeDelta {
    let added = fresh
        .iter()
        .filter(|(uuid, _)| !previous.contains_key(uuid))
        .map(|(_, volume)| volume.clone())
        .collect();
    let removed = previous
        .keys()
        .filter(|uuid| !fresh.contains_key(uuid))
        .copied()
        .collect();
    VolumeDelta { added, removed }
}

/// Whether a bucket's tags mark it as UDX-enabled
pub fn is_udx_enabled(tags: &BucketTags) -> bool {
    tags.get(UDX_TAG_KEY).map(String::as_str) == Some(UDX_TAG_ENABLED)
}

// =============================================================================
// Reconciler
// =============================================================================

/// Owner of the in-memory volume cache
pub struct VolumeCacheReconciler {
    device: Device,
    s3: ObjectStorageClientRef,
    events: EventSender,
    cache: RwLock<Arc<VolumeSnapshot>>,
    metrics: Option<UslMetrics>,
}

impl VolumeCacheReconciler {
    /// Create a reconciler with an empty cache
    pub fn new(device: Device, s3: ObjectStorageClientRef, events: EventSender) -> Self {
        Self {
            device,
            s3,
            events,
            cache: RwLock::new(Arc::new(VolumeSnapshot::new())),
            metrics: None,
        }
    }

    /// Attach service metrics
    pub fn with_metrics(mut self, metrics: UslMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Seed the cache from the persistent store.
    ///
    /// On failure the cache stays empty and every qualifying bucket will be
    /// announced again on the first pass.
    pub async fn bootstrap(&self, store: &dyn VolumeStore) {
        match store.load_all().await {
            Ok(volumes) => {
                let snapshot: VolumeSnapshot =
                    volumes.into_iter().map(|v| (v.uuid, v)).collect();
                info!("Restored {} volumes from the volume store", snapshot.len());
                self.set_gauge(snapshot.len());
                *self.cache.write() = Arc::new(snapshot);
            }
            Err(e) => {
                error!(
                    "Failed to restore the volume cache from the volume store: {}. \
                     All volumes are considered new, redundant events may appear",
                    e
                );
            }
        }
    }

    /// Current cache snapshot
    pub fn snapshot(&self) -> Arc<VolumeSnapshot> {
        self.cache.read().clone()
    }

    /// The device whose volumes are cached
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Volumes of `device_id`
    pub fn volumes_for_device(&self, device_id: &Uuid) -> Result<Vec<Volume>> {
        self.check_device(device_id)?;
        Ok(self.snapshot().values().cloned().collect())
    }

    /// A single volume by UUID
    pub fn volume(&self, volume_id: &Uuid) -> Result<Volume> {
        self.snapshot()
            .get(volume_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Volume", volume_id))
    }

    /// Fail with not-found unless `device_id` is this device
    pub fn check_device(&self, device_id: &Uuid) -> Result<()> {
        if *device_id != self.device.uuid {
            return Err(Error::not_found("Device", device_id));
        }
        Ok(())
    }

    /// Derive a fresh snapshot from the object storage listing
    pub async fn fetch_snapshot(&self) -> Result<VolumeSnapshot> {
        let mut snapshot = VolumeSnapshot::new();
        for bucket in self.s3.list_buckets().await? {
            let tags = self.s3.get_bucket_tagging(&bucket.name).await?;
            if is_udx_enabled(&tags) {
                let volume = Volume::for_bucket(&self.device, &bucket.name);
                snapshot.insert(volume.uuid, volume);
            }
        }
        Ok(snapshot)
    }

    /// Run one reconciliation pass.
    ///
    /// A failed fetch leaves the cache untouched and emits nothing.
    pub async fn update(&self) -> Result<VolumeDelta> {
        let fresh = self.fetch_snapshot().await?;

        let size = fresh.len();
        let delta = {
            // Readers stay on the old snapshot until every event of this
            // pass is in the channel.
            let mut cache = self.cache.write();
            let delta = diff_snapshots(&cache, &fresh);
            for event in delta.clone().into_events() {
                debug!(kind = event.kind(), volume = %event.volume_uuid(), "Enqueuing volume event");
                self.events.send(event)?;
            }
            *cache = Arc::new(fresh);
            delta
        };

        self.set_gauge(size);
        if let Some(metrics) = &self.metrics {
            metrics.cache_passes.inc();
        }
        if !delta.is_empty() {
            info!(
                "Volume cache updated: {} new, {} removed, {} cached",
                delta.added.len(),
                delta.removed.len(),
                size
            );
        }

        Ok(delta)
    }

    /// Refresh the cache every `period` until `cancel` fires.
    ///
    /// Failed passes are logged and retried on the next tick.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!("Volume cache reconciliation started (every {:?})", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }

            if let Err(e) = self.update().await {
                if let Some(metrics) = &self.metrics {
                    metrics.cache_failures.inc();
                }
                if e.is_transient() {
                    warn!("Volume cache update skipped, back-end unavailable: {}", e);
                } else {
                    error!("Unexpected error during volume cache update: {}", e);
                }
            }
        }

        info!("Volume cache reconciliation stopped");
    }

    fn set_gauge(&self, size: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.volumes_cached.set(size as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::PublicEvent;
    use crate::domain::ports::ObjectStorageClient;
    use crate::usl::backends::{InMemoryObjectStorage, InMemoryVolumeStore};
    use crate::volumes::events::{event_channel, EventReceiver};
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    fn device() -> Device {
        Device::new(
            "lab",
            Uuid::parse_str("6f1c1a4e-52c4-4c3b-9a51-1f7e0c2b9d00").unwrap(),
            "Seagate",
        )
    }

    async fn udx_bucket(s3: &InMemoryObjectStorage, name: &str) {
        s3.create_bucket(name).await.unwrap();
        s3.put_bucket_tagging(name, BucketTags::from([(UDX_TAG_KEY.into(), UDX_TAG_ENABLED.into())]))
            .await
            .unwrap();
    }

    struct Fixture {
        s3: Arc<InMemoryObjectStorage>,
        store: Arc<InMemoryVolumeStore>,
        reconciler: VolumeCacheReconciler,
        events: EventReceiver,
    }

    fn fixture() -> Fixture {
        let s3 = Arc::new(InMemoryObjectStorage::new());
        let store = Arc::new(InMemoryVolumeStore::new());
        let (tx, rx) = event_channel(store.clone());
        let reconciler = VolumeCacheReconciler::new(device(), s3.clone(), tx);
        Fixture {
            s3,
            store,
            reconciler,
            events: rx,
        }
    }

    async fn drain(events: &EventReceiver) -> Vec<PublicEvent> {
        let mut out = Vec::new();
        while events.pending().await > 0 {
            out.push(events.next_event().await.unwrap());
        }
        out
    }

    #[test]
    fn test_diff_snapshots() {
        let device = device();
        let a = Volume::for_bucket(&device, "bucket-a");
        let b = Volume::for_bucket(&device, "bucket-b");
        let c = Volume::for_bucket(&device, "bucket-c");

        let previous: VolumeSnapshot = [(a.uuid, a.clone()), (b.uuid, b.clone())].into();
        let fresh: VolumeSnapshot = [(b.uuid, b.clone()), (c.uuid, c.clone())].into();

        let delta = diff_snapshots(&previous, &fresh);
        assert_eq!(delta.added, vec![c]);
        assert_eq!(delta.removed, vec![a.uuid]);

        assert!(diff_snapshots(&fresh, &fresh).is_empty());
    }

    #[test]
    fn test_udx_tag_filter() {
        assert!(is_udx_enabled(&BucketTags::from([("udx".into(), "enabled".into())])));
        assert!(!is_udx_enabled(&BucketTags::from([("udx".into(), "disabled".into())])));
        assert!(!is_udx_enabled(&BucketTags::from([("team".into(), "enabled".into())])));
        assert!(!is_udx_enabled(&BucketTags::new()));
    }

    #[tokio::test]
    async fn test_only_tagged_buckets_become_volumes() {
        let f = fixture();
        udx_bucket(&f.s3, "photos").await;
        f.s3.create_bucket("scratch").await.unwrap();

        let delta = f.reconciler.update().await.unwrap();
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].bucket_name, "photos");

        let snapshot = f.reconciler.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&device().volume_uuid("photos")));
    }

    #[tokio::test]
    async fn test_events_match_delta_between_passes() {
        let f = fixture();
        udx_bucket(&f.s3, "bucket-a").await;
        udx_bucket(&f.s3, "bucket-b").await;
        f.reconciler.update().await.unwrap();
        assert_eq!(drain(&f.events).await.len(), 2);

        // Pass n+1: a loses its tag, c appears, b unchanged
        f.s3.put_bucket_tagging("bucket-a", BucketTags::new()).await.unwrap();
        udx_bucket(&f.s3, "bucket-c").await;
        f.reconciler.update().await.unwrap();

        let events = drain(&f.events).await;
        let device = device();
        let c = Volume::for_bucket(&device, "bucket-c");
        assert_eq!(events.len(), 2);
        assert!(events.contains(&PublicEvent::NewVolume { volume: c.to_public() }));
        assert!(events.contains(&PublicEvent::VolumeRemoved {
            uuid: device.volume_uuid("bucket-a")
        }));

        let cached: HashSet<_> = f.reconciler.snapshot().keys().copied().collect();
        let expected: HashSet<_> = [device.volume_uuid("bucket-b"), c.uuid].into();
        assert_eq!(cached, expected);
    }

    #[tokio::test]
    async fn test_unchanged_pass_emits_nothing() {
        let f = fixture();
        udx_bucket(&f.s3, "bucket-a").await;
        f.reconciler.update().await.unwrap();
        drain(&f.events).await;

        let delta = f.reconciler.update().await.unwrap();
        assert!(delta.is_empty());
        assert_eq!(f.events.pending().await, 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cache() {
        let f = fixture();
        udx_bucket(&f.s3, "bucket-a").await;
        f.reconciler.update().await.unwrap();
        drain(&f.events).await;
        let before = f.reconciler.snapshot();

        udx_bucket(&f.s3, "bucket-b").await;
        f.s3.set_available(false);

        let result = f.reconciler.update().await;
        assert_matches!(result, Err(Error::BackendUnavailable { .. }));
        assert_eq!(*f.reconciler.snapshot(), *before);
        assert_eq!(f.events.pending().await, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_then_first_pass() {
        let f = fixture();
        let device = device();
        let a = Volume::for_bucket(&device, "bucket-a");
        let b = Volume::for_bucket(&device, "bucket-b");
        f.store.store(&a).await.unwrap();
        f.store.store(&b).await.unwrap();

        f.reconciler.bootstrap(f.store.as_ref()).await;
        assert_eq!(f.reconciler.snapshot().len(), 2);

        udx_bucket(&f.s3, "bucket-b").await;
        udx_bucket(&f.s3, "bucket-c").await;
        f.reconciler.update().await.unwrap();

        let c = Volume::for_bucket(&device, "bucket-c");
        let events = drain(&f.events).await;
        assert_eq!(events.len(), 2);
        assert!(events.contains(&PublicEvent::NewVolume { volume: c.to_public() }));
        assert!(events.contains(&PublicEvent::VolumeRemoved { uuid: a.uuid }));

        let cached: HashSet<_> = f.reconciler.snapshot().keys().copied().collect();
        assert_eq!(cached, [b.uuid, c.uuid].into());

        // Consuming the events converged the store with the cache
        let stored: HashSet<_> = f.store.load_all().await.unwrap().iter().map(|v| v.uuid).collect();
        assert_eq!(stored, cached);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_starts_empty() {
        let f = fixture();
        f.store.store(&Volume::for_bucket(&device(), "bucket-a")).await.unwrap();
        f.store.set_available(false);

        f.reconciler.bootstrap(f.store.as_ref()).await;
        assert!(f.reconciler.snapshot().is_empty());

        // Everything qualifying is announced again
        f.store.set_available(true);
        udx_bucket(&f.s3, "bucket-a").await;
        let delta = f.reconciler.update().await.unwrap();
        assert_eq!(delta.added.len(), 1);
    }

    #[tokio::test]
    async fn test_read_accessors() {
        let f = fixture();
        let device = device();
        udx_bucket(&f.s3, "bucket-a").await;
        f.reconciler.update().await.unwrap();

        let volumes = f.reconciler.volumes_for_device(&device.uuid).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_matches!(
            f.reconciler.volumes_for_device(&Uuid::new_v4()),
            Err(Error::NotFound { .. })
        );

        let uuid = device.volume_uuid("bucket-a");
        assert_eq!(f.reconciler.volume(&uuid).unwrap().bucket_name, "bucket-a");
        assert_matches!(
            f.reconciler.volume(&Uuid::new_v4()),
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_and_cancellation() {
        let f = fixture();
        udx_bucket(&f.s3, "bucket-a").await;

        let reconciler = Arc::new(f.reconciler);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconciler.clone().run(Duration::from_secs(3), cancel.clone()));

        // The consumer suspends until the first tick produces the event
        let event = f.events.next_event().await.unwrap();
        assert_matches!(event, PublicEvent::NewVolume { .. });
        assert_eq!(reconciler.snapshot().len(), 1);

        // Failures do not stop the task
        f.s3.set_available(false);
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }
}
