//! Persistence hooks for the OAuth token.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::auth::Token;
use super::{SpotifyError, SpotifyResult};

/// Where the client loads and saves its token.
///
/// Implementations are called with the client's token lock held, so they
/// must not call back into the client.
pub trait TokenStore: Send + Sync {
    /// Returns the stored token, or `None` when nothing has been saved.
    fn load(&self) -> SpotifyResult<Option<Token>>;

    fn save(&self, token: &Token) -> SpotifyResult<()>;

    /// Removes the stored token. Deleting a missing token succeeds.
    fn delete(&self) -> SpotifyResult<()>;
}

const TOKEN_FILE_NAME: &str = "spotify_token.json";

/// Default token location: `<config dir>/riff/spotify_token.json`.
#[must_use]
pub fn default_token_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|dir| dir.join("riff").join(TOKEN_FILE_NAME))
}

/// JSON token file readable only by the owner.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_token_path`].
    pub fn at_default_location() -> SpotifyResult<Self> {
        default_token_path().map(Self::new).ok_or_else(|| {
            SpotifyError::Storage(io::Error::new(
                io::ErrorKind::NotFound,
                "could not determine config directory",
            ))
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> SpotifyResult<Option<Token>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| SpotifyError::Parse(format!("token file {}: {e}", self.path.display())))
    }

    fn save(&self, token: &Token) -> SpotifyResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_vec_pretty(token)
            .map_err(|e| SpotifyError::Parse(e.to_string()))?;
        fs::write(&self.path, data)?;
        restrict_permissions(&self.path)?;
        log::debug!("[Auth] Token saved to {}", self.path.display());
        Ok(())
    }

    fn delete(&self) -> SpotifyResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// In-process store, used by tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn with_token(token: Token) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> SpotifyResult<Option<Token>> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &Token) -> SpotifyResult<()> {
        *self.token.lock() = Some(token.clone());
        Ok(())
    }

    fn delete(&self) -> SpotifyResult<()> {
        *self.token.lock() = None;
        Ok(())
    }
}
