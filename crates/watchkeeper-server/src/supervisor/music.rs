// crates/watchkeeper-server/src/supervisor/music.rs
// ============================================================================
// Module: Music Now-Playing Loop
// Description: Ingest of the player's status file directory.
// Purpose: Publish `music.track.*` and `music.playing`, with track-change and
//          play/pause transition events.
// Dependencies: watchkeeper-core, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! The music player exports status files (`title.txt`, `artist.txt`,
//! `album.txt`, `playing.txt`) into one directory. A (title, artist) change
//! emits `TRACK_CHANGED`; play/pause transitions emit `MUSIC_STARTED` /
//! `MUSIC_STOPPED`. A missing directory means no player — the loop idles
//! without logging.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::warn;
use watchkeeper_core::EventType;
use watchkeeper_core::SetState;
use watchkeeper_core::Severity;
use watchkeeper_core::StateKey;

use crate::runtime::EmitEvent;
use crate::runtime::Runtime;
use crate::supervisor::tick;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event source label for music emissions.
const SOURCE: &str = "supervisor.music";

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Now-playing snapshot assembled from the status directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NowPlaying {
    /// Track title.
    title: String,
    /// Track artist.
    artist: String,
    /// Track album.
    album: String,
    /// Whether playback is active.
    playing: bool,
}

/// Reads the status directory into a snapshot.
fn read_now_playing(dir: &Path) -> Option<NowPlaying> {
    let read = |name: &str| -> Option<String> {
        std::fs::read_to_string(dir.join(name)).ok().map(|raw| raw.trim().to_string())
    };
    let title = read("title.txt")?;
    let artist = read("artist.txt").unwrap_or_default();
    let album = read("album.txt").unwrap_or_default();
    let playing = read("playing.txt")
        .map(|raw| matches!(raw.as_str(), "1" | "true" | "playing"))
        .unwrap_or(false);
    Some(NowPlaying {
        title,
        artist,
        album,
        playing,
    })
}

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Runs the music loop until shutdown.
pub async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let cadence_ms = runtime.config.supervisor.active_cadence_ms;
    let mut prev: Option<NowPlaying> = None;
    loop {
        if !tick(&mut shutdown, cadence_ms).await {
            return;
        }
        let Some(current) = read_now_playing(&runtime.config.supervisor.music_dir) else {
            continue;
        };
        if let Err(detail) = publish(&runtime, &current, prev.as_ref()) {
            warn!(detail = %detail, "music publish failed");
            continue;
        }
        prev = Some(current);
    }
}

/// Publishes the snapshot and emits transition events.
fn publish(
    runtime: &Runtime,
    current: &NowPlaying,
    prev: Option<&NowPlaying>,
) -> Result<(), String> {
    let observed_at = runtime.now();
    let writes: [(&str, serde_json::Value); 4] = [
        ("music.track.title", json!(current.title)),
        ("music.track.artist", json!(current.artist)),
        ("music.track.album", json!(current.album)),
        ("music.playing", json!(current.playing)),
    ];
    for (key, value) in writes {
        let key = StateKey::parse(key).map_err(|err| err.to_string())?;
        runtime
            .write_state(SetState {
                key,
                value,
                source: SOURCE.to_string(),
                confidence: None,
                observed_at,
                quiet: true,
            })
            .map_err(|err| err.to_string())?;
    }

    let Some(prev) = prev else {
        return Ok(());
    };
    if (&current.title, &current.artist) != (&prev.title, &prev.artist) {
        emit(runtime, EventType::TrackChanged, json!({
            "title": current.title,
            "artist": current.artist,
            "album": current.album,
        }))?;
    }
    if current.playing != prev.playing {
        let event_type =
            if current.playing { EventType::MusicStarted } else { EventType::MusicStopped };
        emit(runtime, event_type, json!({ "title": current.title }))?;
    }
    Ok(())
}

/// Emits one music event.
fn emit(
    runtime: &Runtime,
    event_type: EventType,
    payload: serde_json::Value,
) -> Result<(), String> {
    runtime
        .emit_event(EmitEvent {
            event_type,
            severity: Severity::Info,
            source: SOURCE,
            correlation_id: None,
            incident_id: None,
            payload,
        })
        .map(|_| ())
        .map_err(|err| err.to_string())
}
