//! # Capture Synchronization Engine
//!
//! Continuously captures a video frame stream from a remote
//! capture-control service and an audio stream from a local input device,
//! keeps the two time-aligned, and hands matched audio/video samples to a
//! downstream consumer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │ Remote capture-control   │        │ Local OS audio stack     │
//! │ service (WebSocket/JSON) │        │ (cpal input device)      │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │ snapshots, events                 │ f32 chunks
//!              ▼                                   ▼
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │ remote::RemoteCapture-   │        │ audio::AudioCapture      │
//! │ Client                   │        │  callback ──▶ bounded    │
//! │  reconnect loop          │        │  channel ──▶ SampleRing  │
//! │  circuit breakers        │        │  watchdog restart        │
//! │  capture backoff         │        └────────────┬─────────────┘
//! └────────────┬─────────────┘                     │
//!              │ Frame                             │ AudioSegment
//!              ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ sync::SyncManager                                           │
//! │  capture-loop thread: frame history + recent audio reads    │
//! │  synchronized_sample(max_age) / adjust_sync_offset / status │
//! └────────────────────────────┬────────────────────────────────┘
//!                              │ SynchronizedSample
//!                              ▼
//!                   downstream classifier (external)
//! ```
//!
//! The resilience primitives (`resilience`) are pure and shared: circuit
//! breakers gate the remote media/snapshot RPCs, and retry strategies
//! drive the reconnect backoff curve.

pub mod audio;
pub mod config;
pub mod error;
pub mod remote;
pub mod resilience;
pub mod sync;

pub use error::{Error, Result};

/// Engine-wide constants
pub mod constants {
    /// Default sample rate for local audio capture
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Default channel count for local audio capture (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default audio ring buffer length in milliseconds
    pub const DEFAULT_RING_MS: u64 = 5_000;

    /// Default video capture rate in frames per second
    pub const DEFAULT_TARGET_FPS: f64 = 5.0;

    /// Default frame history capacity
    pub const DEFAULT_FRAME_HISTORY: usize = 30;

    /// Default tolerance for audio/video pairing in milliseconds
    pub const DEFAULT_MAX_SYNC_DIFF_MS: u64 = 150;

    /// Default snapshot resolution requested from the remote service
    pub const DEFAULT_SNAPSHOT_WIDTH: u32 = 640;
    pub const DEFAULT_SNAPSHOT_HEIGHT: u32 = 360;

    /// Reconnect backoff bounds
    pub const RECONNECT_BASE_INTERVAL_MS: u64 = 5_000;
    pub const RECONNECT_MAX_INTERVAL_MS: u64 = 60_000;
    pub const RECONNECT_FACTOR: f64 = 1.5;

    /// Capture-path backoff bounds (flapping snapshot protection)
    pub const CAPTURE_BACKOFF_INITIAL_MS: u64 = 5_000;
    pub const CAPTURE_BACKOFF_MAX_MS: u64 = 60_000;
}
