//! Spotify Web API wire models and their mapping onto the domain model.
//!
//! Only the fields the domain needs are modelled; everything else in the
//! JSON is ignored. Nullable fields default so that podcasts, local files
//! and ads decode without error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Device, DeviceType, HistoryEntry, PlaybackState, Platform, Queue, RepeatMode, Track};

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Objects
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub album_type: String,
    #[serde(default)]
    pub artists: Vec<ArtistObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<ArtistObject>,
    #[serde(default)]
    pub album: AlbumObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaylistObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
}

impl TrackObject {
    /// Flattens the nested artist/album records into a domain [`Track`].
    #[must_use]
    pub fn into_track(self) -> Track {
        let artists: Vec<String> = self.artists.into_iter().map(|a| a.name).collect();
        let id = self
            .id
            .unwrap_or_else(|| self.uri.rsplit(':').next().unwrap_or_default().to_string());
        Track {
            id,
            uri: self.uri,
            title: self.name,
            artist: artists.first().cloned().unwrap_or_default(),
            artists,
            album: self.album.name,
            duration: Duration::from_millis(self.duration_ms),
            source: Platform::Spotify,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Devices & Player
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceObject {
    /// Null for restricted devices.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub volume_percent: Option<u8>,
    #[serde(default)]
    pub supports_volume: bool,
}

#[derive(Debug, Deserialize)]
pub struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<DeviceObject>,
}

/// Maps Spotify's device type string onto [`DeviceType`].
#[must_use]
pub fn map_device_type(kind: &str) -> DeviceType {
    match kind {
        "Computer" => DeviceType::Computer,
        "Smartphone" => DeviceType::Phone,
        "Speaker" => DeviceType::Speaker,
        "TV" => DeviceType::Tv,
        _ => DeviceType::Other,
    }
}

impl DeviceObject {
    #[must_use]
    pub fn into_device(self) -> Device {
        Device {
            id: self.id.unwrap_or_default(),
            device_type: map_device_type(&self.device_type),
            name: self.name,
            platform: Platform::Spotify,
            is_active: self.is_active,
            account: None,
            volume: self.volume_percent.map(|v| v.min(100)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextObject {
    #[serde(default, rename = "type")]
    pub context_type: String,
    #[serde(default)]
    pub uri: String,
}

/// Body of `GET /me/player`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerStateObject {
    #[serde(default)]
    pub device: Option<DeviceObject>,
    #[serde(default)]
    pub shuffle_state: bool,
    #[serde(default)]
    pub repeat_state: Option<String>,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
    /// Null between tracks and for ads; an episode object for podcasts.
    #[serde(default)]
    pub item: Option<TrackObject>,
    #[serde(default)]
    pub currently_playing_type: String,
    #[serde(default)]
    pub context: Option<ContextObject>,
}

impl PlayerStateObject {
    #[must_use]
    pub fn into_state(self) -> PlaybackState {
        let volume = self
            .device
            .as_ref()
            .and_then(|d| d.volume_percent)
            .unwrap_or(0)
            .min(100);
        let device = self
            .device
            .filter(|d| d.id.as_deref().is_some_and(|id| !id.is_empty()))
            .map(DeviceObject::into_device);
        PlaybackState {
            track: self.item.map(TrackObject::into_track),
            device,
            account: None,
            is_playing: self.is_playing,
            progress: Duration::from_millis(self.progress_ms.unwrap_or(0)),
            volume,
            shuffle: self.shuffle_state,
            repeat: self
                .repeat_state
                .and_then(|r| r.parse().ok())
                .unwrap_or(RepeatMode::Off),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue & History
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `GET /me/player/queue`.
#[derive(Debug, Deserialize)]
pub struct QueueResponse {
    #[serde(default)]
    pub currently_playing: Option<TrackObject>,
    #[serde(default)]
    pub queue: Vec<TrackObject>,
}

impl QueueResponse {
    #[must_use]
    pub fn into_queue(self) -> Queue {
        let upcoming = self.queue.into_iter().map(TrackObject::into_track).collect();
        match self.currently_playing {
            Some(current) => Queue::with_current(current.into_track(), upcoming),
            None => Queue::upcoming_only(upcoming),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlayHistoryObject {
    pub track: TrackObject,
    pub played_at: DateTime<Utc>,
}

/// Body of `GET /me/player/recently-played`.
#[derive(Debug, Deserialize)]
pub struct RecentlyPlayedResponse {
    #[serde(default)]
    pub items: Vec<PlayHistoryObject>,
}

impl RecentlyPlayedResponse {
    #[must_use]
    pub fn into_history(self) -> Vec<HistoryEntry> {
        self.items
            .into_iter()
            .map(|item| HistoryEntry {
                track: item.track.into_track(),
                played_at: item.played_at,
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search & User
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of catalog item `GET /search` can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl SearchKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Playlist => "playlist",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page<T> {
    /// Search pages may contain nulls for removed items.
    #[serde(default = "Vec::new")]
    pub items: Vec<Option<T>>,
    #[serde(default)]
    pub total: u32,
}

impl<T> Page<T> {
    pub fn into_items(self) -> impl Iterator<Item = T> {
        self.items.into_iter().flatten()
    }
}

/// Body of `GET /search`. Sections are absent unless requested.
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub tracks: Option<Page<TrackObject>>,
    #[serde(default)]
    pub albums: Option<Page<AlbumObject>>,
    #[serde(default)]
    pub artists: Option<Page<ArtistObject>>,
    #[serde(default)]
    pub playlists: Option<Page<PlaylistObject>>,
}

impl SearchResponse {
    /// The first item of `kind`, if the search returned any.
    #[must_use]
    pub fn first(self, kind: SearchKind) -> Option<SearchHit> {
        let (uri, name, artists) = match kind {
            SearchKind::Track => {
                let t = self.tracks?.into_items().next()?;
                (t.uri, t.name, t.artists)
            }
            SearchKind::Album => {
                let a = self.albums?.into_items().next()?;
                (a.uri, a.name, a.artists)
            }
            SearchKind::Artist => {
                let a = self.artists?.into_items().next()?;
                (a.uri, a.name, Vec::new())
            }
            SearchKind::Playlist => {
                let p = self.playlists?.into_items().next()?;
                (p.uri, p.name, Vec::new())
            }
        };
        Some(SearchHit {
            kind,
            uri,
            name,
            artist: artists.into_iter().next().map(|a| a.name),
        })
    }
}

/// A single playable search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub kind: SearchKind,
    pub uri: String,
    pub name: String,
    /// Primary artist, for tracks and albums.
    pub artist: Option<String>,
}

/// Body of `GET /me`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserObject {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// `premium`, `free` or `open`.
    #[serde(default)]
    pub product: Option<String>,
}

impl UserObject {
    #[must_use]
    pub fn is_premium(&self) -> bool {
        self.product.as_deref() == Some("premium")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests & Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `PUT /me/player/play`. An empty body resumes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlayRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uris: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<PlayOffset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayOffset {
    pub position: u32,
}

/// Body of `PUT /me/player`.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub device_ids: Vec<String>,
    pub play: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// Message from a `{"error":{"status","message"}}` body, else the raw body.
#[must_use]
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ => body.trim().to_string(),
    }
}
