//! Centralized error types for the riff core library.
//!
//! Each adapter has its own transport-level error (`SoapError`,
//! `DiscoveryError`, `SpotifyError`). Everything crossing the [`Player`]
//! boundary is a [`PlayerError`], whose [`ErrorKind`] is what callers branch on.
//!
//! [`Player`]: crate::player::Player

use thiserror::Error;

use crate::model::Platform;
use crate::sonos::discovery::DiscoveryError;
use crate::sonos::soap::SoapError;
use crate::spotify::SpotifyError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a stable machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::Cache(_) => "device_cache_failed",
            Self::DeviceNotFound(_) => "sonos_device_not_found",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Parse => "soap_parse_error",
        }
    }
}

impl ErrorCode for SpotifyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::Api { .. } => "spotify_api_error",
            Self::NotAuthenticated => "not_authenticated",
            Self::Auth(_) => "auth_failed",
            Self::Parse(_) => "spotify_parse_error",
            Self::Storage(_) => "token_storage_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Player Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification of a [`PlayerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or expired credentials that could not be refreshed.
    Authentication,
    /// The backend has no device to act on. Recoverable via fallback.
    NoActiveDevice,
    /// The requested state already holds.
    AlreadyInState,
    /// Rate limiting or server-side failure.
    RateLimited,
    /// Transport failure.
    Network,
    /// Malformed response body.
    Protocol,
    /// Operation the backend cannot perform.
    Unsupported,
    /// The backend refused the request.
    Rejected,
    /// A named device or item could not be found.
    NotFound,
    /// The caller cancelled the operation.
    Cancelled,
    /// Local configuration is missing or invalid.
    Config,
}

/// Error returned by every [`Player`](crate::player::Player) operation.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("no active device")]
    NoActiveDevice,

    #[error("already {0}")]
    AlreadyInState(&'static str),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{operation} is not supported on {platform}")]
    Unsupported {
        operation: &'static str,
        platform: Platform,
    },

    #[error("request rejected{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenient Result alias for player operations.
pub type PlayerResult<T> = Result<T, PlayerError>;

impl PlayerError {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated(_) => ErrorKind::Authentication,
            Self::NoActiveDevice => ErrorKind::NoActiveDevice,
            Self::AlreadyInState(_) => ErrorKind::AlreadyInState,
            Self::Server { .. } => ErrorKind::RateLimited,
            Self::Network(_) => ErrorKind::Network,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimited | ErrorKind::Network)
    }

    /// Short hint telling the user how to recover, if there is one.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::Authentication => Some("Run `riff auth login` to authenticate with Spotify"),
            ErrorKind::NoActiveDevice => {
                Some("Start playback on a device, pass --device, or set defaults.device")
            }
            ErrorKind::RateLimited => Some("Wait a moment and try again"),
            ErrorKind::Network => Some("Check your network connection"),
            ErrorKind::NotFound => Some("Run `riff devices` to list available devices"),
            ErrorKind::Config => Some("Check your config file and RIFF_* environment variables"),
            ErrorKind::Rejected => {
                if let Self::Rejected {
                    status: Some(403), ..
                } = self
                {
                    Some("This action may require Spotify Premium")
                } else {
                    None
                }
            }
            ErrorKind::AlreadyInState
            | ErrorKind::Protocol
            | ErrorKind::Unsupported
            | ErrorKind::Cancelled => None,
        }
    }
}

impl ErrorCode for PlayerError {
    fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Authentication => "not_authenticated",
            ErrorKind::NoActiveDevice => "no_active_device",
            ErrorKind::AlreadyInState => "already_in_state",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Network => "network_error",
            ErrorKind::Protocol => "protocol_error",
            ErrorKind::Unsupported => "unsupported_operation",
            ErrorKind::Rejected => "request_rejected",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "configuration_error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

impl From<SoapError> for PlayerError {
    fn from(err: SoapError) -> Self {
        match err {
            SoapError::Http(e) => Self::Network(e.to_string()),
            SoapError::HttpStatus(status, body) if status >= 500 => Self::Server {
                status,
                message: body,
            },
            SoapError::HttpStatus(status, body) => Self::Rejected {
                status: Some(status),
                message: body,
            },
            SoapError::Fault(msg) => Self::Rejected {
                status: None,
                message: msg,
            },
            SoapError::Parse => Self::Protocol("malformed SOAP response".into()),
        }
    }
}

impl From<DiscoveryError> for PlayerError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::DeviceNotFound(name) => Self::NotFound(name),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<SpotifyError> for PlayerError {
    fn from(err: SpotifyError) -> Self {
        match err {
            SpotifyError::Http(e) => Self::Network(e.to_string()),
            SpotifyError::Api { status: 401, message } => Self::NotAuthenticated(message),
            SpotifyError::Api { status, message } if status == 429 || status >= 500 => {
                Self::Server { status, message }
            }
            SpotifyError::Api { status, message } => Self::Rejected {
                status: Some(status),
                message,
            },
            SpotifyError::NotAuthenticated => Self::NotAuthenticated("no stored token".into()),
            SpotifyError::Auth(msg) => Self::NotAuthenticated(msg),
            SpotifyError::Parse(msg) => Self::Protocol(msg),
            SpotifyError::Storage(e) => Self::NotAuthenticated(format!("token storage: {e}")),
            SpotifyError::Cancelled => Self::Cancelled,
        }
    }
}
