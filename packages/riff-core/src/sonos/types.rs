//! Domain types for Sonos speakers, zone groups and transport state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Device, DeviceType, Platform};

/// A discovered Sonos speaker.
///
/// This is also the on-disk cache record, so field names are part of the
/// cache file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonosDevice {
    pub ip: String,
    pub port: u16,
    /// Canonical RINCON_xxx identifier.
    pub uuid: String,
    #[serde(default)]
    pub model: String,
    /// Room name. Empty until resolved from topology or DeviceProperties.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub last_seen: DateTime<Utc>,
}

impl SonosDevice {
    /// Name to show the user, falling back to the address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.ip
        } else {
            &self.name
        }
    }

    /// Converts to the backend-agnostic device record.
    #[must_use]
    pub fn to_device(&self) -> Device {
        Device {
            id: self.uuid.clone(),
            name: self.display_name().to_string(),
            device_type: DeviceType::Speaker,
            platform: Platform::Sonos,
            is_active: true,
            account: None,
            volume: None,
        }
    }
}

/// A member of a zone group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneGroupMember {
    pub uuid: String,
    pub ip: String,
    pub port: u16,
    pub zone_name: String,
    pub location: String,
}

impl ZoneGroupMember {
    /// Builds a device record for this member, stamped with `now`.
    #[must_use]
    pub fn to_sonos_device(&self, now: DateTime<Utc>) -> SonosDevice {
        SonosDevice {
            ip: self.ip.clone(),
            port: self.port,
            uuid: self.uuid.clone(),
            model: String::new(),
            name: self.zone_name.clone(),
            location: self.location.clone(),
            last_seen: now,
        }
    }
}

/// A set of speakers playing in sync under one coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneGroup {
    pub id: String,
    /// The coordinator's room name.
    pub name: String,
    pub coordinator_uuid: String,
    pub members: Vec<ZoneGroupMember>,
}

impl ZoneGroup {
    /// The coordinator's member record.
    #[must_use]
    pub fn coordinator(&self) -> Option<&ZoneGroupMember> {
        self.members.iter().find(|m| m.uuid == self.coordinator_uuid)
    }
}

/// AVTransport transport state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransportState {
    Playing,
    PausedPlayback,
    Stopped,
    Transitioning,
    NoMediaPresent,
    Unknown(String),
}

impl TransportState {
    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

impl std::str::FromStr for TransportState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "PLAYING" => Self::Playing,
            "PAUSED_PLAYBACK" => Self::PausedPlayback,
            "STOPPED" => Self::Stopped,
            "TRANSITIONING" => Self::Transitioning,
            "NO_MEDIA_PRESENT" => Self::NoMediaPresent,
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Result of AVTransport `GetPositionInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionInfo {
    pub track: u32,
    /// `H:MM:SS` as reported by the speaker.
    pub track_duration: String,
    /// DIDL-Lite metadata (already unescaped once from the SOAP body).
    pub track_metadata: String,
    pub track_uri: String,
    /// Elapsed position as `H:MM:SS`.
    pub rel_time: String,
}

/// Result of AVTransport `GetMediaInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub nr_tracks: u32,
    pub current_uri: String,
    pub current_uri_metadata: String,
}
