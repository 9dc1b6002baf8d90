//! The player capability contract shared by both backends.
//!
//! Callers hold an `Arc<dyn Player>` and never see backend-specific fields.
//! Every operation takes a [`CancellationToken`]; cancelling it drops the
//! in-flight request and yields [`PlayerError::Cancelled`].

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{PlayerError, PlayerResult};
use crate::model::{HistoryEntry, PlaybackState, Platform, Queue};

/// Playback control over a single resolved device.
///
/// Implementations must tolerate concurrent calls on the same handle: the
/// event watcher polls `get_state` while interactive commands run.
#[async_trait]
pub trait Player: Send + Sync {
    /// Backend this player talks to.
    fn platform(&self) -> Platform;

    /// Resumes playback. Resuming something already playing succeeds.
    async fn play(&self, cancel: &CancellationToken) -> PlayerResult<()>;

    /// Starts playing a specific URI (track, album, playlist or artist).
    async fn play_uri(&self, uri: &str, cancel: &CancellationToken) -> PlayerResult<()>;

    async fn pause(&self, cancel: &CancellationToken) -> PlayerResult<()>;

    async fn next(&self, cancel: &CancellationToken) -> PlayerResult<()>;

    async fn prev(&self, cancel: &CancellationToken) -> PlayerResult<()>;

    /// Seeks within the current track.
    async fn seek(&self, position_ms: u64, cancel: &CancellationToken) -> PlayerResult<()>;

    /// Sets volume; values above 100 are clamped.
    async fn set_volume(&self, percent: u8, cancel: &CancellationToken) -> PlayerResult<()>;

    async fn get_state(&self, cancel: &CancellationToken) -> PlayerResult<PlaybackState>;

    async fn get_queue(&self, cancel: &CancellationToken) -> PlayerResult<Queue>;

    async fn get_recently_played(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> PlayerResult<Vec<HistoryEntry>>;

    async fn add_to_queue(&self, uri: &str, cancel: &CancellationToken) -> PlayerResult<()>;
}

/// Runs `fut` until it completes or `cancel` fires.
///
/// The future is dropped on cancellation, which aborts any in-flight HTTP call.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> PlayerResult<T>
where
    F: Future<Output = PlayerResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PlayerError::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancellable_returns_result_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let out = cancellable(&cancel, async { Ok::<_, PlayerError>(7) }).await;
        assert_eq!(out.ok(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellable_aborts_pending_future() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child.cancel();
        });

        let out = cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, PlayerError>(())
        })
        .await;

        assert!(matches!(out, Err(PlayerError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellable_short_circuits_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = cancellable(&cancel, async { Ok::<_, PlayerError>(1) }).await;
        assert!(matches!(out, Err(PlayerError::Cancelled)));
    }
}
