//! Volume Record Stores
//!
//! Two [`VolumeStore`] adapters: an in-memory map and a directory holding one
//! JSON file per volume, named after the volume UUID.

use crate::domain::model::Volume;
use crate::domain::ports::VolumeStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory [`VolumeStore`] with an outage switch
#[derive(Debug)]
pub struct InMemoryVolumeStore {
    volumes: DashMap<Uuid, Volume>,
    available: AtomicBool,
}

impl Default for InMemoryVolumeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVolumeStore {
    pub fn new() -> Self {
        Self {
            volumes: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BackendUnavailable {
                backend: "volume-store".to_string(),
            })
        }
    }
}

#[async_trait]
impl VolumeStore for InMemoryVolumeStore {
    async fn load_all(&self) -> Result<Vec<Volume>> {
        self.check()?;
        let mut volumes: Vec<Volume> = self.volumes.iter().map(|e| e.value().clone()).collect();
        volumes.sort_by_key(|v| v.uuid);
        Ok(volumes)
    }

    async fn store(&self, volume: &Volume) -> Result<()> {
        self.check()?;
        self.volumes.insert(volume.uuid, volume.clone());
        Ok(())
    }

    async fn delete(&self, uuid: &Uuid) -> Result<()> {
        self.check()?;
        self.volumes.remove(uuid);
        Ok(())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// [`VolumeStore`] keeping `<uuid>.json` files in a directory
#[derive(Debug, Clone)]
pub struct FileVolumeStore {
    root_path: PathBuf,
}

impl FileVolumeStore {
    /// Open (and create if needed) the store directory
    pub async fn with_path(root_path: impl Into<PathBuf>) -> Result<Self> {
        let root_path = root_path.into();
        fs::create_dir_all(&root_path).await?;
        Ok(Self { root_path })
    }

    fn record_path(&self, uuid: &Uuid) -> PathBuf {
        self.root_path.join(format!("{}.json", uuid))
    }
}

#[async_trait]
impl VolumeStore for FileVolumeStore {
    async fn load_all(&self) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();
        let mut entries = fs::read_dir(&self.root_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let json = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Volume>(&json) {
                Ok(volume) => volumes.push(volume),
                Err(e) => warn!("Skipping unreadable volume record {}: {}", path.display(), e),
            }
        }

        volumes.sort_by_key(|v| v.uuid);
        debug!("Loaded {} volume records from {}", volumes.len(), self.root_path.display());
        Ok(volumes)
    }

    async fn store(&self, volume: &Volume) -> Result<()> {
        let path = self.record_path(&volume.uuid);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(volume)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, uuid: &Uuid) -> Result<()> {
        match fs::remove_file(self.record_path(uuid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
