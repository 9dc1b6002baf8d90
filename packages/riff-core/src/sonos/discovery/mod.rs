//! Sonos speaker discovery.
//!
//! [`SonosDiscovery`] owns the device cache and the zone-group cache. A call
//! to [`SonosDiscovery::devices`] answers from the freshest cache tier and
//! only falls back to an SSDP search when both tiers are stale (or the
//! caller forces a refresh).

mod cache;
mod ssdp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use thiserror::Error;

pub use cache::{default_cache_path, DeviceCache};
pub use ssdp::search;

use super::grouping::get_zone_name;
use super::soap::SoapResult;
use super::types::{SonosDevice, ZoneGroup};
use super::zone_groups::ZoneGroupCache;
use crate::error::PlayerResult;
use crate::protocol_constants::DEVICE_CACHE_TTL;

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send the SSDP search on any interface.
    #[error("failed to send SSDP search: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// The on-disk device cache could not be read or written.
    #[error("device cache error: {0}")]
    Cache(String),

    /// No discovered speaker matches the query.
    #[error("no Sonos speaker matching '{0}'")]
    DeviceNotFound(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Discovery front-end with caching.
pub struct SonosDiscovery {
    client: Client,
    timeout: Duration,
    cache: DeviceCache,
    zone_groups: Arc<ZoneGroupCache>,
}

impl SonosDiscovery {
    #[must_use]
    pub fn new(client: Client, timeout: Duration, cache: DeviceCache) -> Self {
        Self {
            client,
            timeout,
            cache,
            zone_groups: Arc::new(ZoneGroupCache::default()),
        }
    }

    /// Shared zone-group cache, handed to players so grouping commands can
    /// invalidate it.
    #[must_use]
    pub fn zone_group_cache(&self) -> Arc<ZoneGroupCache> {
        Arc::clone(&self.zone_groups)
    }

    /// Returns known speakers, searching the network when the caches are
    /// stale or `force` is set.
    ///
    /// A forced refresh drops both cache tiers first, so a failed search
    /// leaves nothing stale behind for the next call.
    pub async fn devices(&self, force: bool) -> DiscoveryResult<Vec<SonosDevice>> {
        if force {
            log::debug!("[Sonos] Refresh requested, dropping cached devices");
            self.cache.clear();
            self.zone_groups.invalidate();
        } else if let Some(devices) = self.cache.get() {
            log::debug!("[Sonos] Using {} cached device(s)", devices.len());
            return Ok(devices);
        }

        let mut devices = search(self.timeout).await?;
        self.name_devices(&mut devices).await;

        if let Err(e) = self.cache.store(&devices) {
            log::warn!("[Sonos] Failed to persist device cache: {}", e);
        }
        Ok(devices)
    }

    /// Fills room names from zone topology, falling back to a per-speaker
    /// `GetZoneAttributes` for anything topology did not cover.
    async fn name_devices(&self, devices: &mut [SonosDevice]) {
        let Some((ip, port)) = devices.first().map(|d| (d.ip.clone(), d.port)) else {
            return;
        };

        self.zone_groups.invalidate();
        match self.zone_groups.get_or_fetch(&self.client, &ip, port).await {
            Ok(groups) => apply_zone_names(devices, &groups),
            Err(e) => log::warn!("[Sonos] Zone topology unavailable: {}", e),
        }

        let lookups = devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.name.is_empty())
            .map(|(i, d)| {
                let client = &self.client;
                async move { (i, get_zone_name(client, &d.ip, d.port).await) }
            })
            .collect::<Vec<_>>();

        for (i, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(name) => devices[i].name = name,
                Err(e) => log::debug!("[Sonos] No zone name for {}: {}", devices[i].ip, e),
            }
        }
    }

    /// Current zone groups, from the short-lived cache when fresh.
    ///
    /// Returns an empty list when no speaker is known.
    pub async fn zone_groups(&self) -> PlayerResult<Vec<ZoneGroup>> {
        let devices = self.devices(false).await?;
        let Some(first) = devices.first() else {
            return Ok(Vec::new());
        };
        let groups: SoapResult<_> = self
            .zone_groups
            .get_or_fetch(&self.client, &first.ip, first.port)
            .await;
        Ok(groups?)
    }

    /// Finds a speaker by UUID, IP, or room name (case-insensitive, then
    /// substring). Refreshes once from the network on a cache miss.
    pub async fn find_device(&self, query: &str) -> DiscoveryResult<SonosDevice> {
        let devices = self.devices(false).await?;
        if let Some(device) = match_device(&devices, query) {
            return Ok(device.clone());
        }

        let devices = self.devices(true).await?;
        match_device(&devices, query)
            .cloned()
            .ok_or_else(|| DiscoveryError::DeviceNotFound(query.to_string()))
    }
}

/// Copies member room names onto devices with the same UUID.
fn apply_zone_names(devices: &mut [SonosDevice], groups: &[ZoneGroup]) {
    let names: HashMap<&str, &str> = groups
        .iter()
        .flat_map(|g| g.members.iter())
        .map(|m| (m.uuid.as_str(), m.zone_name.as_str()))
        .collect();

    for device in devices.iter_mut() {
        if let Some(name) = names.get(device.uuid.as_str()) {
            device.name = (*name).to_string();
        }
    }
}

/// Builds device records for zone-group members, stamped with the current time.
#[must_use]
pub fn members_as_devices(groups: &[ZoneGroup]) -> Vec<SonosDevice> {
    let now = Utc::now();
    groups
        .iter()
        .flat_map(|g| g.members.iter())
        .map(|m| m.to_sonos_device(now))
        .collect()
}

fn match_device<'a>(devices: &'a [SonosDevice], query: &str) -> Option<&'a SonosDevice> {
    let lower = query.to_lowercase();
    devices
        .iter()
        .find(|d| d.uuid == query || d.ip == query)
        .or_else(|| devices.iter().find(|d| d.name.to_lowercase() == lower))
        .or_else(|| {
            devices
                .iter()
                .find(|d| !d.name.is_empty() && d.name.to_lowercase().contains(&lower))
        })
}
