//! Riff Core - one player contract over Spotify and Sonos.
//!
//! The crate lets a single command surface drive two unrelated backends: the
//! Spotify Web API (OAuth-protected REST) and Sonos speakers on the LAN
//! (SSDP discovery and UPnP SOAP control).
//!
//! # Architecture
//!
//! - [`model`]: Backend-agnostic track, device, state, queue and history types
//! - [`player`]: The [`Player`] trait both adapters implement
//! - [`spotify`]: REST client, PKCE login and token lifecycle
//! - [`sonos`]: Discovery, SOAP control, DIDL-Lite metadata and zone groups
//! - [`resolver`]: Device lookup across backends and the no-active-device fallback
//! - [`watcher`]: Poll-and-diff loop turning snapshots into playback events
//! - [`error`]: Per-adapter errors and the unified [`PlayerError`]
//!
//! # Abstraction Traits
//!
//! - [`Player`]: Playback control over one resolved device
//! - [`SpotifyDevices`] / [`SonosDirectory`]: Device listings the resolver reads
//! - [`DevicePicker`]: Interactive choice when no device is named
//! - [`TokenStore`](spotify::TokenStore): Where the OAuth token lives

#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod player;
pub mod protocol_constants;
pub mod resolver;
pub mod sonos;
pub mod spotify;
pub mod watcher;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, ErrorKind, PlayerError, PlayerResult};
pub use model::{
    Device, DeviceType, HistoryEntry, PlaybackState, Platform, Queue, RepeatMode, Track,
};
pub use player::{cancellable, Player};
pub use resolver::{
    DevicePicker, DeviceResolver, FallbackConfig, ResolvedDevice, SonosDirectory, SpotifyDevices,
};

// Re-export adapters
pub use sonos::{SonosDevice, SonosDiscovery, SonosPlayer, ZoneGroup};
pub use spotify::{SpotifyClient, SpotifyPlayer};

// Re-export watcher types
pub use watcher::{EventFormatter, EventStream, OutputMode, WatchEvent, WatchEventKind, Watcher};
