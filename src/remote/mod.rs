//! Remote capture-control client
//!
//! Maintains a live WebSocket session with the capture-control service
//! and exposes frame snapshot and media transport operations that degrade
//! gracefully when the service flaps.

pub mod client;
pub mod media;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;
pub mod transport;

use std::time::Duration;

use crate::error::Result;

pub use client::{ClientStats, ConnectionState, RemoteCaptureClient};
pub use media::{MediaPlaybackState, MediaStateCache};
pub use protocol::{CaptureSource, Event, MediaAction, Request, ServiceVersion, SourceKind};
pub use transport::{CaptureTransport, WsTransport};

/// Read access to the discovered capture sources
pub trait SourceLister {
    /// Cached source list; refreshed on connect and on scene events
    fn sources(&self) -> Vec<CaptureSource>;
}

/// Media transport control for a named source
pub trait MediaController {
    fn control_media(
        &self,
        source: &str,
        action: MediaAction,
        position_sec: Option<f64>,
    ) -> Result<()>;

    /// Playback properties; served from cache when the service is down
    fn media_properties(&self, source: &str) -> Result<MediaPlaybackState>;

    /// Current playback position; served from cache when the service is down
    fn media_time(&self, source: &str) -> Result<MediaPlaybackState>;
}

/// Drains service notifications into client-side state
pub trait EventSubscriber {
    /// Process pending events, waiting up to `max_wait` for the first one.
    /// Returns the number of events handled.
    fn pump_events(&self, max_wait: Duration) -> usize;
}
