//! Fixed protocol constants and tuned defaults.
//!
//! The UPnP and OAuth values are defined by external services and changing
//! them breaks interoperability. The tuned values are grouped separately.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Spotify Web API
// ─────────────────────────────────────────────────────────────────────────────

/// Base URL of the Spotify Web API.
pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Base URL of the Spotify accounts service (authorize and token endpoints).
pub const SPOTIFY_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// Default OAuth redirect URI for the local callback listener.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

/// Scopes requested during login.
pub const DEFAULT_SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-read-recently-played",
    "user-read-private",
    "streaming",
];

/// A token is treated as expired this long before its real expiry.
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// PKCE code verifier length (characters).
pub const PKCE_VERIFIER_LEN: usize = 64;

/// OAuth state parameter length (characters).
pub const OAUTH_STATE_LEN: usize = 32;

/// Number of retries after the first attempt for transient REST failures.
pub const SPOTIFY_MAX_RETRIES: u32 = 3;

/// First backoff delay; doubled on each further retry.
pub const SPOTIFY_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound of the recently-played endpoint's `limit` parameter.
pub const SPOTIFY_MAX_HISTORY_LIMIT: u32 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP / UPnP
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// SSDP search target for Sonos ZonePlayer devices.
pub const SONOS_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:ZonePlayer:1";

/// MX header value (max response delay in seconds).
pub const SSDP_MX_SECS: u64 = 2;

/// Default time spent collecting SSDP replies.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Port Sonos speakers serve UPnP on when the location omits it.
pub const SONOS_DEFAULT_PORT: u16 = 1400;

/// Timeout for SOAP HTTP requests (seconds).
pub const SOAP_TIMEOUT_SECS: u64 = 10;

/// Query suffix Sonos expects on Spotify music-service URIs (`sid=12` is Spotify).
pub const SONOS_SPOTIFY_SUFFIX: &str = "?sid=12&flags=8224&sn=1";

// ─────────────────────────────────────────────────────────────────────────────
// Caches
// ─────────────────────────────────────────────────────────────────────────────

/// Freshness window for discovered Sonos devices (memory and disk).
pub const DEVICE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Freshness window for zone-group topology listings.
pub const ZONE_GROUP_CACHE_TTL: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Event Watcher
// ─────────────────────────────────────────────────────────────────────────────

/// Default interval between state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the watcher's event queue.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;
