//! Engine configuration
//!
//! Loaded from `engine.toml` in the platform config directory when
//! present, otherwise built from defaults. Every section has its own
//! defaults so a partial file only overrides what it names.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};

/// Remote capture-control service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// WebSocket endpoint of the capture-control service
    pub endpoint: String,
    /// Handshake/request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Video source to capture; empty means first discovered video source
    pub video_source: String,
    pub snapshot: SnapshotConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:4455".to_string(),
            request_timeout_ms: 5_000,
            video_source: String::new(),
            snapshot: SnapshotConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Snapshot request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Encoder quality 1..=100, -1 for the service default
    pub quality: i32,
    /// Substitute the last known-good frame (or a placeholder) when a
    /// snapshot fails; false propagates the failure instead
    pub fallback: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            format: "png".to_string(),
            width: DEFAULT_SNAPSHOT_WIDTH,
            height: DEFAULT_SNAPSHOT_HEIGHT,
            quality: -1,
            fallback: true,
        }
    }
}

/// Reconnect loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_interval_ms: u64,
    pub factor: f64,
    pub max_interval_ms: u64,
    /// 0 means retry forever
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: RECONNECT_BASE_INTERVAL_MS,
            factor: RECONNECT_FACTOR,
            max_interval_ms: RECONNECT_MAX_INTERVAL_MS,
            max_attempts: 0,
        }
    }
}

/// Local audio capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device index from enumeration; None means default device
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Circular sample buffer length in milliseconds
    pub ring_ms: u64,
    /// Callback chunk size in frames; None lets the device pick
    pub chunk_frames: Option<u32>,
    /// No samples for this long means the stream is considered dead
    pub stale_after_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            ring_ms: DEFAULT_RING_MS,
            chunk_frames: Some(1024),
            stale_after_ms: 2_000,
        }
    }
}

impl AudioConfig {
    /// Ring capacity in samples (all channels interleaved)
    pub fn ring_capacity(&self) -> usize {
        let per_channel = (self.sample_rate as u64 * self.ring_ms / 1000) as usize;
        per_channel * self.channels as usize
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub target_fps: f64,
    pub frame_history: usize,
    /// Pairings farther apart than this are flagged, not rejected
    pub max_sync_diff_ms: u64,
    /// Initial audio/video offset; positive means audio lags video
    pub sync_offset_ms: i64,
    /// Length of each audio read recorded for matching
    pub audio_segment_ms: u64,
    /// How many recent audio reads are kept for matching
    pub audio_history: usize,
    /// Where clip artifacts are written
    pub clip_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            frame_history: DEFAULT_FRAME_HISTORY,
            max_sync_diff_ms: DEFAULT_MAX_SYNC_DIFF_MS,
            sync_offset_ms: 0,
            audio_segment_ms: 200,
            audio_history: 50,
            clip_dir: PathBuf::from("clips"),
        }
    }
}

impl SyncConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(0.1))
    }
}

/// Circuit-breaker defaults for guarded remote operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

impl From<&BreakerConfig> for crate::resilience::CircuitBreakerConfig {
    fn from(cfg: &BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            recovery_timeout: Duration::from_millis(cfg.recovery_timeout_ms),
            half_open_max_calls: cfg.half_open_max_calls,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub audio: AudioConfig,
    pub sync: SyncConfig,
    pub breaker: BreakerConfig,
}

impl AppConfig {
    /// Platform config file path, e.g. `~/.config/capture-sync-engine/engine.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "capture-sync-engine")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading config");
                Self::load_from(&path)
            }
            _ => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}
