//! Backend-agnostic domain types.
//!
//! Every adapter call rebuilds these values from the wire. They carry no
//! behavior beyond small derived views (progress percentage, queue cursor).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Platform & Device Type
// ─────────────────────────────────────────────────────────────────────────────

/// The two playback backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Spotify,
    Sonos,
}

impl Platform {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::Sonos => "sonos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of physical or logical endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Speaker,
    Computer,
    Phone,
    Tv,
    Soundbar,
    #[default]
    Other,
}

impl DeviceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speaker => "speaker",
            Self::Computer => "computer",
            Self::Phone => "phone",
            Self::Tv => "tv",
            Self::Soundbar => "soundbar",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat mode as understood by the REST backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Context,
}

impl RepeatMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Track => "track",
            Self::Context => "context",
        }
    }
}

impl std::str::FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "track" => Ok(Self::Track),
            "context" => Ok(Self::Context),
            other => Err(format!("invalid repeat mode: {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Track & Device
// ─────────────────────────────────────────────────────────────────────────────

/// A playable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub uri: String,
    pub title: String,
    /// Primary artist (first of `artists`, or empty).
    pub artist: String,
    pub artists: Vec<String>,
    pub album: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub source: Platform,
}

/// A playback endpoint on either backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub platform: Platform,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback State
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time snapshot of a player.
///
/// `progress` may exceed the track duration because of polling skew; use
/// [`PlaybackState::progress_percent`] for a clamped view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    pub track: Option<Track>,
    pub device: Option<Device>,
    pub account: Option<String>,
    pub is_playing: bool,
    #[serde(with = "duration_ms")]
    pub progress: Duration,
    pub volume: u8,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

impl PlaybackState {
    /// Progress through the current track in `0.0..=100.0`.
    ///
    /// Returns 0 when there is no track or its duration is unknown.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        let Some(track) = &self.track else {
            return 0.0;
        };
        if track.duration.is_zero() {
            return 0.0;
        }
        let ratio = self.progress.as_secs_f64() / track.duration.as_secs_f64();
        (ratio * 100.0).clamp(0.0, 100.0)
    }

    /// URI of the current track, if any.
    #[must_use]
    pub fn track_uri(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.uri.as_str())
    }

    /// Id of the current device, if any.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.id.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue & History
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered tracks plus a cursor pointing at the current one.
///
/// A cursor outside `0..tracks.len()` means there is no current track.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Queue {
    pub tracks: Vec<Track>,
    pub current_index: usize,
}

impl Queue {
    /// Queue whose first entry is the current track.
    #[must_use]
    pub fn with_current(current: Track, upcoming: Vec<Track>) -> Self {
        let mut tracks = Vec::with_capacity(upcoming.len() + 1);
        tracks.push(current);
        tracks.extend(upcoming);
        Self {
            tracks,
            current_index: 0,
        }
    }

    /// Queue with nothing currently playing.
    #[must_use]
    pub fn upcoming_only(tracks: Vec<Track>) -> Self {
        let current_index = tracks.len();
        Self {
            tracks,
            current_index,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }

    /// Tracks after the cursor. With no current track, the whole list.
    #[must_use]
    pub fn upcoming(&self) -> &[Track] {
        if self.current_index < self.tracks.len() {
            &self.tracks[self.current_index + 1..]
        } else {
            &self.tracks
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }
}

/// A track and when it was played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub track: Track,
    pub played_at: DateTime<Utc>,
}

/// Serializes a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
