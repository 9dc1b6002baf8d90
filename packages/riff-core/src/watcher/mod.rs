//! Poll-and-diff event watcher.
//!
//! A [`Watcher`] polls one [`Player`] on a fixed interval and turns each
//! pair of consecutive snapshots into [`WatchEvent`]s. Events go through a
//! bounded broadcast queue: when a consumer falls behind, the oldest pending
//! events are dropped and polling never blocks.
//!
//! - `diff` - Snapshot comparison rules
//! - `format` - Text and JSON line rendering

pub mod diff;
pub mod format;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

pub use diff::{diff_states, WatchEvent, WatchEventKind, COMPLETION_THRESHOLD};
pub use format::{EventFormatter, OutputMode};

use crate::error::PlayerError;
use crate::model::PlaybackState;
use crate::player::Player;
use crate::protocol_constants::{DEFAULT_POLL_INTERVAL, EVENT_CHANNEL_CAPACITY};

/// Consumer side of the event queue.
///
/// Ends once the watcher stops. Gaps left by dropped events are skipped.
pub struct EventStream {
    inner: BroadcastStream<WatchEvent>,
}

impl Stream for EventStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    log::warn!("[Watcher] Consumer lagging, dropped {} oldest events", n);
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Polls a player and publishes state-change events.
pub struct Watcher {
    player: Arc<dyn Player>,
    interval: Duration,
    tx: broadcast::Sender<WatchEvent>,
}

impl Watcher {
    /// A zero `interval` falls back to the default of one second.
    pub fn new(player: Arc<dyn Player>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            player,
            interval,
            tx,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Opens a consumer. Only events published after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            inner: BroadcastStream::new(self.tx.subscribe()),
        }
    }

    /// Subscribes, then runs the poll loop on a background task.
    pub fn spawn(self, cancel: CancellationToken) -> (EventStream, JoinHandle<()>) {
        let events = self.subscribe();
        let handle = tokio::spawn(self.run(cancel));
        (events, handle)
    }

    /// Polls until `cancel` fires.
    ///
    /// Consumes the watcher so the queue closes exactly once, when this
    /// returns. The first poll happens immediately. Failed polls are logged
    /// and skipped without touching the previous snapshot.
    pub async fn run(self, cancel: CancellationToken) {
        log::info!(
            "[Watcher] Polling {} every {}ms",
            self.player.platform(),
            self.interval.as_millis()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous: Option<PlaybackState> = None;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = match self.player.get_state(&cancel).await {
                Ok(state) => state,
                Err(PlayerError::Cancelled) => break,
                Err(e) => {
                    log::debug!("[Watcher] Poll failed: {}", e);
                    continue;
                }
            };
            if cancel.is_cancelled() {
                break;
            }

            for event in diff_states(previous.as_ref(), &current, Utc::now()) {
                tracing::debug!(kind = event.kind.as_str(), track = ?event.current.track_uri(), "watch_event");
                // No subscribers is not an error; the event is simply unseen.
                let _ = self.tx.send(event);
            }
            previous = Some(current);
        }

        log::info!("[Watcher] Stopped");
    }
}
