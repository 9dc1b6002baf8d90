//! Sonos speaker discovery and control.
//!
//! Speakers are found with SSDP and controlled with UPnP SOAP calls.
//!
//! # Module Structure
//!
//! - `types` - Domain types for speakers, zone groups and transport state
//! - `services` - UPnP service definitions (URNs, paths)
//! - `discovery` - SSDP search plus memory/disk device cache
//! - `zone_groups` - Zone group topology parsing, retrieval and caching
//! - `didl` - DIDL-Lite metadata parsing
//! - `uri` - Spotify URI to Sonos URI translation
//! - `playback` - Transport commands, queue and state reads
//! - `volume` - Master volume
//! - `grouping` - Group join/leave and room names
//! - `player` - `SonosPlayer`, the [`Player`](crate::player::Player) implementation
//! - `soap` - Low-level SOAP protocol implementation
//! - `utils` - Shared utility functions

pub mod didl;
pub mod discovery;
pub(crate) mod grouping;
pub(crate) mod playback;
pub mod player;
pub(crate) mod retry;
pub mod services;
pub mod soap;
pub mod types;
pub mod uri;
pub mod utils;
pub(crate) mod volume;
pub mod zone_groups;

#[cfg(test)]
pub(crate) mod test_fixtures;

use async_trait::async_trait;

pub use discovery::{DiscoveryError, DiscoveryResult, SonosDiscovery};
pub use player::SonosPlayer;
pub use services::SonosService;
pub use types::{SonosDevice, TransportState, ZoneGroup, ZoneGroupMember};
pub use zone_groups::ZoneGroupCache;

use crate::error::PlayerResult;
use crate::resolver::SonosDirectory;

#[async_trait]
impl SonosDirectory for SonosDiscovery {
    async fn sonos_devices(&self, refresh: bool) -> PlayerResult<Vec<SonosDevice>> {
        Ok(self.devices(refresh).await?)
    }

    async fn sonos_zone_groups(&self) -> PlayerResult<Vec<ZoneGroup>> {
        self.zone_groups().await
    }
}
