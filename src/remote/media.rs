//! Media playback state cache
//!
//! Best-effort cache of per-source playback state. Updated optimistically
//! when a control request succeeds and from service events; served as the
//! fallback when the media circuit is open or the transport fails.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::remote::protocol::{MediaAction, MediaStatusPayload};

/// Last known playback state for one media source
#[derive(Debug, Clone)]
pub struct MediaPlaybackState {
    pub playing: bool,
    pub position_sec: f64,
    pub duration_sec: f64,
    pub last_update: Instant,
}

impl MediaPlaybackState {
    fn new() -> Self {
        Self {
            playing: false,
            position_sec: 0.0,
            duration_sec: 0.0,
            last_update: Instant::now(),
        }
    }
}

/// Cache keyed by source name
pub struct MediaStateCache {
    inner: Mutex<HashMap<String, MediaPlaybackState>>,
}

impl MediaStateCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, source: &str) -> Option<MediaPlaybackState> {
        self.inner.lock().get(source).cloned()
    }

    /// Replace the cached state with a fresh service status
    pub fn update_from_status(&self, source: &str, status: &MediaStatusPayload) {
        let mut inner = self.inner.lock();
        inner.insert(
            source.to_string(),
            MediaPlaybackState {
                playing: status.playing,
                position_sec: status.position_sec,
                duration_sec: status.duration_sec,
                last_update: Instant::now(),
            },
        );
    }

    /// Optimistically apply a control action that the service accepted
    pub fn apply_action(&self, source: &str, action: MediaAction, position_sec: Option<f64>) {
        let mut inner = self.inner.lock();
        let state = inner
            .entry(source.to_string())
            .or_insert_with(MediaPlaybackState::new);
        match action {
            MediaAction::Play => state.playing = true,
            MediaAction::Pause => state.playing = false,
            MediaAction::Stop => {
                state.playing = false;
                state.position_sec = 0.0;
            }
            MediaAction::Restart => {
                state.playing = true;
                state.position_sec = 0.0;
            }
            MediaAction::Seek => {
                if let Some(pos) = position_sec {
                    state.position_sec = pos;
                }
            }
        }
        state.last_update = Instant::now();
    }

    /// Apply a media-state event pushed by the service
    pub fn apply_event(&self, source: &str, playing: bool, position_sec: f64) {
        let mut inner = self.inner.lock();
        let state = inner
            .entry(source.to_string())
            .or_insert_with(MediaPlaybackState::new);
        state.playing = playing;
        state.position_sec = position_sec;
        state.last_update = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for MediaStateCache {
    fn default() -> Self {
        Self::new()
    }
}
