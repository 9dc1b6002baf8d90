//! Snapshot comparison: turns two successive states into discrete events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::PlaybackState;

/// Fraction of a track's duration past which leaving it counts as finishing
/// it rather than skipping it.
pub const COMPLETION_THRESHOLD: f64 = 0.95;

/// Kind of change detected between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    TrackChange,
    TrackComplete,
    TrackSkip,
    Pause,
    Resume,
    VolumeChange,
    DeviceChange,
}

impl WatchEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrackChange => "track_change",
            Self::TrackComplete => "track_complete",
            Self::TrackSkip => "track_skip",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::VolumeChange => "volume_change",
            Self::DeviceChange => "device_change",
        }
    }
}

/// A detected change, with the snapshots it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub timestamp: DateTime<Utc>,
    /// `None` only for the first observation.
    pub previous: Option<PlaybackState>,
    pub current: PlaybackState,
}

/// True when `state` was at or past [`COMPLETION_THRESHOLD`] of a track
/// with a known duration.
#[must_use]
pub fn was_completed(state: &PlaybackState) -> bool {
    match &state.track {
        Some(track) if !track.duration.is_zero() => {
            state.progress.as_secs_f64() >= track.duration.as_secs_f64() * COMPLETION_THRESHOLD
        }
        _ => false,
    }
}

fn track_changed(prev: &PlaybackState, curr: &PlaybackState) -> bool {
    prev.track_uri() != curr.track_uri()
}

fn device_changed(prev: &PlaybackState, curr: &PlaybackState) -> bool {
    prev.device_id() != curr.device_id()
}

/// Events implied by moving from `prev` to `curr`, in a fixed order: track,
/// play/pause, volume, device.
#[must_use]
pub fn diff_states(
    prev: Option<&PlaybackState>,
    curr: &PlaybackState,
    now: DateTime<Utc>,
) -> Vec<WatchEvent> {
    let event = |kind| WatchEvent {
        kind,
        timestamp: now,
        previous: prev.cloned(),
        current: curr.clone(),
    };

    let Some(prev) = prev else {
        return if curr.track.is_some() {
            vec![event(WatchEventKind::TrackChange)]
        } else {
            Vec::new()
        };
    };

    let mut events = Vec::new();

    if track_changed(prev, curr) {
        let kind = match &prev.track {
            None => WatchEventKind::TrackChange,
            Some(_) if was_completed(prev) => WatchEventKind::TrackComplete,
            Some(_) => WatchEventKind::TrackSkip,
        };
        events.push(event(kind));
    }

    match (prev.is_playing, curr.is_playing) {
        (true, false) => events.push(event(WatchEventKind::Pause)),
        (false, true) => events.push(event(WatchEventKind::Resume)),
        _ => {}
    }

    if prev.volume != curr.volume {
        events.push(event(WatchEventKind::VolumeChange));
    }

    if device_changed(prev, curr) {
        events.push(event(WatchEventKind::DeviceChange));
    }

    events
}
