//! Renders watch events as one line each, for humans or for machines.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use super::diff::{WatchEvent, WatchEventKind};
use crate::model::Track;

/// Output flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

/// Line formatter for [`WatchEvent`]s.
#[derive(Debug, Clone, Copy)]
pub struct EventFormatter {
    mode: OutputMode,
    timestamps: bool,
    icons: bool,
}

impl Default for EventFormatter {
    fn default() -> Self {
        Self {
            mode: OutputMode::Text,
            timestamps: false,
            icons: true,
        }
    }
}

fn icon(kind: WatchEventKind) -> &'static str {
    match kind {
        WatchEventKind::TrackChange => "🎵",
        WatchEventKind::TrackComplete => "✅",
        WatchEventKind::TrackSkip => "⏭️",
        WatchEventKind::Pause => "⏸️",
        WatchEventKind::Resume => "▶️",
        WatchEventKind::VolumeChange => "🔊",
        WatchEventKind::DeviceChange => "📱",
    }
}

fn artist_title(track: &Track) -> String {
    if track.artist.is_empty() {
        track.title.clone()
    } else {
        format!("{} - {}", track.artist, track.title)
    }
}

/// One event as a JSON object.
#[derive(Debug, Serialize)]
struct JsonEvent<'a> {
    #[serde(rename = "type")]
    kind: WatchEventKind,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<&'a Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_track: Option<&'a Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
    is_playing: bool,
    volume: u8,
    progress_ms: u64,
}

impl EventFormatter {
    #[must_use]
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Prefixes text lines with the local `HH:MM:SS`.
    #[must_use]
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    #[must_use]
    pub fn with_icons(mut self, enabled: bool) -> Self {
        self.icons = enabled;
        self
    }

    #[must_use]
    pub fn format(&self, event: &WatchEvent) -> String {
        match self.mode {
            OutputMode::Text => self.format_text(event),
            OutputMode::Json => Self::format_json(event),
        }
    }

    fn format_text(&self, event: &WatchEvent) -> String {
        let mut parts = Vec::with_capacity(3);
        if self.timestamps {
            let local: DateTime<Local> = event.timestamp.with_timezone(&Local);
            parts.push(local.format("%H:%M:%S").to_string());
        }
        if self.icons {
            parts.push(icon(event.kind).to_string());
        }
        parts.push(describe(event));
        parts.join(" ")
    }

    fn format_json(event: &WatchEvent) -> String {
        let current = &event.current;
        let line = JsonEvent {
            kind: event.kind,
            timestamp: event.timestamp,
            track: current.track.as_ref(),
            previous_track: event.previous.as_ref().and_then(|p| p.track.as_ref()),
            device: current.device.as_ref().map(|d| d.name.as_str()),
            is_playing: current.is_playing,
            volume: current.volume,
            progress_ms: u64::try_from(current.progress.as_millis()).unwrap_or(u64::MAX),
        };
        serde_json::to_string(&line).unwrap_or_else(|e| {
            log::warn!("[Watcher] Failed to encode event: {}", e);
            format!(r#"{{"type":"{}"}}"#, event.kind.as_str())
        })
    }
}

/// Human description of an event.
fn describe(event: &WatchEvent) -> String {
    let current = &event.current;
    let previous_track = event.previous.as_ref().and_then(|p| p.track.as_ref());
    match event.kind {
        WatchEventKind::TrackChange => match &current.track {
            Some(track) => format!("Now playing: {}", artist_title(track)),
            None => "Track changed".to_string(),
        },
        WatchEventKind::TrackComplete => match previous_track {
            Some(track) => format!("Finished: {}", artist_title(track)),
            None => "Track completed".to_string(),
        },
        WatchEventKind::TrackSkip => match previous_track {
            Some(track) => format!("Skipped: {}", artist_title(track)),
            None => "Track skipped".to_string(),
        },
        WatchEventKind::Pause => "Paused".to_string(),
        WatchEventKind::Resume => "Resumed".to_string(),
        WatchEventKind::VolumeChange => format!("Volume: {}%", current.volume),
        WatchEventKind::DeviceChange => match &current.device {
            Some(device) => format!("Device: {}", device.name),
            None => "Device disconnected".to_string(),
        },
    }
}
