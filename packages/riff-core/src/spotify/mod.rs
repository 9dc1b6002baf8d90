//! Spotify Web API adapter.
//!
//! - `auth` - PKCE login, code exchange and token refresh
//! - `callback` - Local HTTP listener that receives the authorization code
//! - `token_store` - Persistence hooks for the OAuth token
//! - `api` - Wire models and their mapping onto the domain model
//! - `client` - Authenticated REST client with retry
//! - `player` - `SpotifyPlayer`, the [`Player`](crate::player::Player) implementation

pub mod api;
pub mod auth;
pub mod callback;
pub mod client;
pub mod player;
pub mod token_store;

#[cfg(test)]
pub(crate) mod test_fixtures;

use async_trait::async_trait;
use thiserror::Error;

pub use api::{SearchHit, SearchKind};
pub use auth::{authorize_url, AuthClient, Pkce, Token};
pub use callback::CallbackServer;
pub use client::{RetryPolicy, SpotifyClient};
pub use player::SpotifyPlayer;
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};

use crate::error::PlayerResult;
use crate::model::Device;
use crate::resolver::SpotifyDevices;

/// Errors from the Spotify REST and accounts services.
#[derive(Debug, Error)]
pub enum SpotifyError {
    /// Transport failure talking to Spotify.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Spotify answered with a non-success status.
    #[error("Spotify API error {status}: {message}")]
    Api { status: u16, message: String },

    /// No token is stored.
    #[error("not logged in to Spotify")]
    NotAuthenticated,

    /// The OAuth flow or a token refresh failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A response body could not be decoded.
    #[error("failed to parse Spotify response: {0}")]
    Parse(String),

    /// Reading or writing the token file failed.
    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

/// Convenient Result alias for Spotify operations.
pub type SpotifyResult<T> = Result<T, SpotifyError>;

impl SpotifyError {
    /// True for failures worth retrying: transport errors, 429 and 5xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by an API error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
impl SpotifyDevices for SpotifyClient {
    async fn spotify_devices(&self) -> PlayerResult<Vec<Device>> {
        Ok(self.devices().await?)
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> PlayerResult<()> {
        Ok(SpotifyClient::transfer_playback(self, device_id, play).await?)
    }
}
