//! CLI configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use riff_core::protocol_constants::{DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_REDIRECT_URI};
use serde::Deserialize;

/// Configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RiffConfig {
    pub spotify: SpotifyConfig,
    pub sonos: SonosConfig,
    pub defaults: DefaultsConfig,
    pub tail: TailConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    /// Application client id. Spotify commands are unavailable without it.
    /// Override: `RIFF_SPOTIFY_CLIENT_ID`
    pub client_id: String,

    /// Must match a redirect URI registered for the application.
    /// Override: `RIFF_SPOTIFY_REDIRECT_URI`
    pub redirect_uri: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SonosConfig {
    /// Room used when Spotify is not configured and no device is named.
    /// Override: `RIFF_SONOS_DEFAULT_ROOM`
    pub default_room: Option<String>,

    /// SSDP search window in seconds.
    /// Override: `RIFF_SONOS_DISCOVERY_TIMEOUT`
    pub discovery_timeout: u64,
}

impl Default for SonosConfig {
    fn default() -> Self {
        Self {
            default_room: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Fallback target when a command finds no active device.
    /// Override: `RIFF_DEFAULT_DEVICE`
    pub device: Option<String>,

    /// Volume applied by `riff volume` when no level is given.
    pub volume: u8,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            device: None,
            volume: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Poll interval for `riff tail`.
    pub interval_ms: u64,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// `$XDG_CONFIG_HOME/riff/config.yaml`, else `~/.config/riff/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))?;
    Some(base.join("riff").join("config.yaml"))
}

impl RiffConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// tried and a missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn from_yaml(content: &str) -> Result<Self> {
        // An empty file deserializes to unit, not to an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("RIFF_SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = val;
        }

        if let Some(val) = var("RIFF_SPOTIFY_REDIRECT_URI") {
            self.spotify.redirect_uri = val;
        }

        if let Some(val) = var("RIFF_SONOS_DEFAULT_ROOM") {
            self.sonos.default_room = Some(val);
        }

        if let Some(val) = var("RIFF_SONOS_DISCOVERY_TIMEOUT") {
            match val.parse() {
                Ok(secs) => self.sonos.discovery_timeout = secs,
                Err(_) => log::warn!("Ignoring invalid RIFF_SONOS_DISCOVERY_TIMEOUT: {}", val),
            }
        }

        if let Some(val) = var("RIFF_DEFAULT_DEVICE") {
            self.defaults.device = Some(val);
        }
    }

    /// Rejects values the commands cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.defaults.volume > 100 {
            bail!(
                "defaults.volume must be between 0 and 100, got {}",
                self.defaults.volume
            );
        }
        if self.tail.interval_ms == 0 {
            bail!("tail.interval_ms must be greater than 0");
        }
        if self.sonos.discovery_timeout == 0 {
            bail!("sonos.discovery_timeout must be greater than 0");
        }
        Ok(())
    }

    /// True once a Spotify client id has been configured.
    pub fn spotify_enabled(&self) -> bool {
        !self.spotify.client_id.trim().is_empty()
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.sonos.discovery_timeout)
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_millis(self.tail.interval_ms)
    }
}
