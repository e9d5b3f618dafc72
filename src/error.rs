//! Error types for the capture synchronization engine

use std::time::Duration;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Media control error: {0}")]
    MediaControl(#[from] MediaControlError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Resilience error: {0}")]
    Resilience(#[from] ResilienceError),

    #[error("Boundary '{name}' failed after {elapsed:?}: {source}")]
    Boundary {
        name: String,
        elapsed: Duration,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level errors against the remote capture-control service.
/// These trigger the reconnect path.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Service rejected request: {0}")]
    Rejected(String),

    #[error("Connection closed by peer")]
    Closed,
}

impl ConnectionError {
    /// Whether this error indicates the session itself is gone, as opposed
    /// to a single failed request on a live session.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::NotConnected | Self::Closed | Self::Timeout => true,
            Self::ConnectFailed(_) => true,
            Self::SendFailed(msg) | Self::ReceiveFailed(msg) => {
                is_connection_loss_message(msg)
            }
            Self::Protocol(_) | Self::Rejected(_) => false,
        }
    }
}

/// Classify a transport error message as a connection loss.
///
/// The remote service surfaces dropped sessions through a handful of
/// OS/library message shapes rather than a single error code.
pub fn is_connection_loss_message(msg: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "broken pipe",
        "not connected",
        "connection aborted",
        "closed",
        "no route to host",
    ];
    let lower = msg.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

/// Frame snapshot failures
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Snapshot request failed: {0}")]
    SnapshotFailed(String),

    #[error("Snapshot decode failed: {0}")]
    DecodeFailed(String),

    #[error("Snapshot response carried no image data")]
    EmptySnapshot,

    #[error("No capture source available")]
    NoSource,

    #[error("Capture suspended for {0:?} after repeated failures")]
    BackedOff(Duration),
}

/// Media transport control failures
#[derive(Error, Debug)]
pub enum MediaControlError {
    #[error("Media source not found: {0}")]
    SourceNotFound(String),

    #[error("Media request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid seek position: {0}")]
    InvalidPosition(f64),
}

/// Local audio capture failures
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio stream stale: no samples for {0:?}")]
    StreamStalled(Duration),

    #[error("Capture not running")]
    NotRunning,
}

/// Synchronization failures surfaced to callers, never substituted
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Stale data: newest frame is {age_ms}ms old (max {max_age_ms}ms)")]
    StaleData { age_ms: u64, max_age_ms: u64 },

    #[error("No data captured yet")]
    NoData,
}

/// Failures raised by the resilience primitives themselves
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_loss_messages() {
        assert!(is_connection_loss_message("Connection reset by peer"));
        assert!(is_connection_loss_message("operation timed out"));
        assert!(is_connection_loss_message("Broken pipe (os error 32)"));
        assert!(!is_connection_loss_message("invalid source name"));
    }

    #[test]
    fn protocol_errors_are_not_connection_loss() {
        assert!(!ConnectionError::Protocol("bad field".into()).is_connection_loss());
        assert!(ConnectionError::Closed.is_connection_loss());
        assert!(ConnectionError::SendFailed("connection refused".into()).is_connection_loss());
    }
}
