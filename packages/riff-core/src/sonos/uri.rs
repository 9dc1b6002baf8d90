//! Spotify URI to Sonos URI translation.
//!
//! Sonos plays Spotify content through its own music-service URIs. Single
//! tracks use `x-sonos-spotify:`; albums, playlists and artists are
//! containers addressed with `x-rincon-cpcontainer:` and a type prefix.

use crate::protocol_constants::SONOS_SPOTIFY_SUFFIX;

const TRACK_SCHEME: &str = "x-sonos-spotify:";
const CONTAINER_SCHEME: &str = "x-rincon-cpcontainer:";
const ALBUM_PREFIX: &str = "1004206c";
const PLAYLIST_PREFIX: &str = "1006206c";

/// Kind of Spotify entity a URI names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyUriKind {
    Track,
    Album,
    Playlist,
    Artist,
    Other,
}

impl SpotifyUriKind {
    /// Classifies a `spotify:<kind>:<id>` URI. Returns `None` for non-Spotify URIs.
    #[must_use]
    pub fn of(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("spotify:")?;
        Some(match rest.split(':').next() {
            Some("track") => Self::Track,
            Some("album") => Self::Album,
            Some("playlist") => Self::Playlist,
            Some("artist") => Self::Artist,
            _ => Self::Other,
        })
    }

    /// Containers must go through the queue; direct transport URIs only
    /// work for single tracks.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Album | Self::Playlist | Self::Artist)
    }
}

/// Translates a Spotify URI into the URI a Sonos speaker can play.
///
/// Non-Spotify URIs are returned unchanged.
#[must_use]
pub fn to_sonos_uri(uri: &str) -> String {
    match SpotifyUriKind::of(uri) {
        None => uri.to_string(),
        Some(SpotifyUriKind::Album) => {
            format!("{CONTAINER_SCHEME}{ALBUM_PREFIX}{uri}{SONOS_SPOTIFY_SUFFIX}")
        }
        Some(SpotifyUriKind::Playlist | SpotifyUriKind::Artist) => {
            format!("{CONTAINER_SCHEME}{PLAYLIST_PREFIX}{uri}{SONOS_SPOTIFY_SUFFIX}")
        }
        Some(SpotifyUriKind::Track | SpotifyUriKind::Other) => {
            format!("{TRACK_SCHEME}{uri}{SONOS_SPOTIFY_SUFFIX}")
        }
    }
}

/// Extracts the Spotify track id from a Sonos transport URI.
///
/// Accepts both `x-sonos-spotify:spotify:track:ID?...` and the percent-encoded
/// `spotify%3atrack%3aID` form some controllers write.
#[must_use]
pub fn spotify_track_id(sonos_uri: &str) -> Option<String> {
    let rest = sonos_uri.strip_prefix(TRACK_SCHEME)?;
    let decoded = rest.replace("%3a", ":").replace("%3A", ":");
    let id = decoded
        .strip_prefix("spotify:track:")?
        .split('?')
        .next()
        .unwrap_or_default();
    (!id.is_empty()).then(|| id.to_string())
}
