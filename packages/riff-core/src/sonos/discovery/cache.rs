//! Discovered-device cache.
//!
//! Two tiers share one freshness window: an in-memory listing sorted by UUID, and
//! a small JSON file that lets a new process skip the network entirely.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{DiscoveryError, DiscoveryResult};
use crate::sonos::types::SonosDevice;

const CACHE_FILE_NAME: &str = "sonos-devices.json";

/// On-disk cache file shape.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    cached_at: DateTime<Utc>,
    devices: Vec<SonosDevice>,
}

/// Default on-disk location: `<cache dir>/riff/sonos-devices.json`.
#[must_use]
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("riff").join(CACHE_FILE_NAME))
}

/// One complete device listing and when it was taken.
struct Snapshot {
    at: DateTime<Utc>,
    devices: Arc<Vec<SonosDevice>>,
}

/// TTL-bounded device cache owned by a discovery instance.
///
/// The memory tier is replaced as a whole, so readers see either the previous
/// listing or the new one.
pub struct DeviceCache {
    ttl: Duration,
    memory: RwLock<Option<Snapshot>>,
    path: Option<PathBuf>,
}

impl DeviceCache {
    /// Creates a cache. With `path = None` the cache is memory-only.
    #[must_use]
    pub fn new(ttl: Duration, path: Option<PathBuf>) -> Self {
        Self {
            ttl,
            memory: RwLock::new(None),
            path,
        }
    }

    fn is_fresh(&self, at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(at);
        age.to_std().map(|age| age < self.ttl).unwrap_or(true)
    }

    fn fresh_memory(&self) -> Option<Arc<Vec<SonosDevice>>> {
        let guard = self.memory.read();
        guard
            .as_ref()
            .filter(|snap| self.is_fresh(snap.at))
            .map(|snap| Arc::clone(&snap.devices))
    }

    /// Returns cached devices if the memory tier, or failing that the disk
    /// tier, is still fresh. A fresh disk hit repopulates memory.
    #[must_use]
    pub fn get(&self) -> Option<Vec<SonosDevice>> {
        if let Some(devices) = self.fresh_memory() {
            return Some(devices.as_ref().clone());
        }

        let path = self.path.as_deref()?;
        match read_cache_file(path) {
            Ok(Some(file)) if self.is_fresh(file.cached_at) => {
                log::debug!(
                    "[Sonos] Loaded {} device(s) from disk cache",
                    file.devices.len()
                );
                Some(self.replace_memory(file.cached_at, file.devices).as_ref().clone())
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("[Sonos] Ignoring unreadable device cache: {}", e);
                None
            }
        }
    }

    /// Sorts `devices` by UUID, dropping duplicates, and swaps them in.
    fn replace_memory(
        &self,
        at: DateTime<Utc>,
        mut devices: Vec<SonosDevice>,
    ) -> Arc<Vec<SonosDevice>> {
        devices.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        devices.dedup_by(|a, b| a.uuid == b.uuid);
        let devices = Arc::new(devices);
        *self.memory.write() = Some(Snapshot {
            at,
            devices: Arc::clone(&devices),
        });
        devices
    }

    /// Replaces both tiers with `devices`.
    ///
    /// A disk write failure is returned, but the memory tier is updated first
    /// so the current process still benefits.
    pub fn store(&self, devices: &[SonosDevice]) -> DiscoveryResult<()> {
        let now = Utc::now();
        let devices = self.replace_memory(now, devices.to_vec());

        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        write_cache_file(
            path,
            &CacheFile {
                cached_at: now,
                devices: devices.as_ref().clone(),
            },
        )
    }

    /// Drops both tiers.
    pub fn clear(&self) {
        *self.memory.write() = None;
        if let Some(path) = self.path.as_deref() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[Sonos] Failed to remove device cache: {}", e);
                }
            }
        }
    }
}

fn read_cache_file(path: &Path) -> DiscoveryResult<Option<CacheFile>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DiscoveryError::Cache(e.to_string())),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| DiscoveryError::Cache(e.to_string()))
}

fn write_cache_file(path: &Path, file: &CacheFile) -> DiscoveryResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DiscoveryError::Cache(e.to_string()))?;
    }
    let data =
        serde_json::to_vec_pretty(file).map_err(|e| DiscoveryError::Cache(e.to_string()))?;
    std::fs::write(path, data).map_err(|e| DiscoveryError::Cache(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(uuid: &str, name: &str) -> SonosDevice {
        SonosDevice {
            ip: "10.0.0.5".into(),
            port: 1400,
            uuid: uuid.into(),
            model: String::new(),
            name: name.into(),
            location: String::new(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn empty_cache_misses() {
        let cache = DeviceCache::new(Duration::from_secs(300), None);
        assert!(cache.get().is_none());
    }

    #[test]
    fn memory_tier_hits_within_ttl() {
        let cache = DeviceCache::new(Duration::from_secs(300), None);
        cache
            .store(&[device("RINCON_B", "Den"), device("RINCON_A", "Kitchen")])
            .expect("store");

        let devices = cache.get().expect("fresh");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].uuid, "RINCON_A");
        assert_eq!(devices[1].name, "Den");
    }

    #[test]
    fn expired_memory_tier_misses() {
        let cache = DeviceCache::new(Duration::ZERO, None);
        cache.store(&[device("RINCON_A", "Kitchen")]).expect("store");
        assert!(cache.get().is_none());
    }

    #[test]
    fn disk_tier_survives_new_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("riff").join(CACHE_FILE_NAME);

        let first = DeviceCache::new(Duration::from_secs(300), Some(path.clone()));
        first.store(&[device("RINCON_A", "Kitchen")]).expect("store");
        assert!(path.exists());

        let second = DeviceCache::new(Duration::from_secs(300), Some(path));
        let devices = second.get().expect("disk hit");
        assert_eq!(devices[0].name, "Kitchen");
        assert!(second.get().is_some());
    }

    #[test]
    fn stale_disk_tier_misses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CACHE_FILE_NAME);
        let stale = CacheFile {
            cached_at: Utc::now() - chrono::Duration::minutes(10),
            devices: vec![device("RINCON_A", "Kitchen")],
        };
        write_cache_file(&path, &stale).expect("write");

        let cache = DeviceCache::new(Duration::from_secs(300), Some(path));
        assert!(cache.get().is_none());
    }

    #[test]
    fn corrupt_disk_tier_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CACHE_FILE_NAME);
        std::fs::write(&path, b"{not json").expect("write");

        let cache = DeviceCache::new(Duration::from_secs(300), Some(path.clone()));
        assert!(cache.get().is_none());
        assert!(matches!(read_cache_file(&path), Err(DiscoveryError::Cache(_))));
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CACHE_FILE_NAME);
        let cache = DeviceCache::new(Duration::from_secs(300), Some(path.clone()));
        cache.store(&[device("RINCON_A", "Kitchen")]).expect("store");

        cache.clear();
        assert!(!path.exists());
        assert!(cache.get().is_none());
    }

    #[test]
    fn readers_never_see_a_partial_listing() {
        let cache = Arc::new(DeviceCache::new(Duration::from_secs(300), None));
        let big: Vec<SonosDevice> = (0..200)
            .map(|i| device(&format!("RINCON_{i:03}"), "Room"))
            .collect();
        cache.store(&big).expect("store");

        let writer = {
            let cache = Arc::clone(&cache);
            let big = big.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    cache.store(&big).expect("store");
                }
            })
        };

        for _ in 0..5_000 {
            let seen = cache.get().expect("fresh").len();
            assert_eq!(seen, 200, "saw a half-written listing");
        }
        writer.join().expect("writer");
    }

    #[test]
    fn duplicate_uuids_collapse() {
        let cache = DeviceCache::new(Duration::from_secs(300), None);
        cache
            .store(&[device("RINCON_A", "Kitchen"), device("RINCON_A", "Kitchen")])
            .expect("store");
        assert_eq!(cache.get().expect("fresh").len(), 1);
    }
}
