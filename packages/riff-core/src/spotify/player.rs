//! [`Player`] implementation backed by the Spotify Web API.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::client::SpotifyClient;
use super::SpotifyError;
use crate::error::{PlayerError, PlayerResult};
use crate::model::{HistoryEntry, PlaybackState, Platform, Queue};
use crate::player::{cancellable, Player};
use crate::sonos::uri::SpotifyUriKind;

/// Maps an error from a playback-control endpoint.
///
/// A 404 there means the account has no active device, which the resolver
/// recovers from by transferring playback.
fn control_error(err: SpotifyError) -> PlayerError {
    match err {
        SpotifyError::Api { status: 404, .. } => PlayerError::NoActiveDevice,
        other => other.into(),
    }
}

/// Controls Spotify playback, optionally pinned to one device.
#[derive(Clone)]
pub struct SpotifyPlayer {
    client: Arc<SpotifyClient>,
    device_id: Option<String>,
}

impl SpotifyPlayer {
    /// Player acting on whichever device is currently active.
    #[must_use]
    pub fn new(client: Arc<SpotifyClient>) -> Self {
        Self {
            client,
            device_id: None,
        }
    }

    /// Attaches `device_id` to every playback-control call.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

#[async_trait]
impl Player for SpotifyPlayer {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    async fn play(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            match self.client.resume(self.device_id()).await {
                // Resuming while already playing is refused with 403.
                Err(SpotifyError::Api { status: 403, .. }) => {
                    log::debug!("[Spotify] Resume refused, already playing");
                    Ok(())
                }
                res => res.map_err(control_error),
            }
        })
        .await
    }

    async fn play_uri(&self, uri: &str, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let res = match SpotifyUriKind::of(uri) {
                Some(kind) if kind.is_container() => {
                    self.client.play_context(uri, None, self.device_id()).await
                }
                _ => {
                    self.client
                        .play_uris(&[uri.to_string()], self.device_id())
                        .await
                }
            };
            res.map_err(control_error)
        })
        .await
    }

    async fn pause(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            self.client
                .pause(self.device_id())
                .await
                .map_err(control_error)
        })
        .await
    }

    async fn next(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            self.client.next(self.device_id()).await.map_err(control_error)
        })
        .await
    }

    async fn prev(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            self.client
                .previous(self.device_id())
                .await
                .map_err(control_error)
        })
        .await
    }

    async fn seek(&self, position_ms: u64, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            self.client
                .seek(position_ms, self.device_id())
                .await
                .map_err(control_error)
        })
        .await
    }

    async fn set_volume(&self, percent: u8, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            self.client
                .set_volume(percent.min(100), self.device_id())
                .await
                .map_err(control_error)
        })
        .await
    }

    async fn get_state(&self, cancel: &CancellationToken) -> PlayerResult<PlaybackState> {
        cancellable(cancel, async { Ok(self.client.playback_state().await?) }).await
    }

    async fn get_queue(&self, cancel: &CancellationToken) -> PlayerResult<Queue> {
        cancellable(cancel, async { Ok(self.client.queue().await?) }).await
    }

    async fn get_recently_played(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> PlayerResult<Vec<HistoryEntry>> {
        cancellable(cancel, async { Ok(self.client.recently_played(limit).await?) }).await
    }

    async fn add_to_queue(&self, uri: &str, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            self.client
                .add_to_queue(uri, self.device_id())
                .await
                .map_err(control_error)
        })
        .await
    }
}
