//! Wire protocol for the capture-control service
//!
//! JSON envelopes over a WebSocket. Every RPC has one explicit response
//! schema with required fields; a response that does not match its schema
//! is a protocol error, never a best-guess attribute scan.

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Kind of a remote capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Media,
}

/// A named video/media input exposed by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSource {
    pub name: String,
    pub kind: SourceKind,
}

/// Service version record from the session handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceVersion {
    pub service_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Media transport actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaAction {
    Play,
    Pause,
    Restart,
    Stop,
    Seek,
}

/// Requests the client can issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Request {
    ListSources,
    TakeSnapshot {
        source: String,
        format: String,
        width: u32,
        height: u32,
        quality: i32,
    },
    MediaControl {
        source: String,
        action: MediaAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        position_sec: Option<f64>,
    },
    GetMediaStatus {
        source: String,
    },
}

/// Client -> service envelope
#[derive(Debug, Serialize)]
pub struct RequestEnvelope {
    pub op: &'static str,
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(id: u64, request: Request) -> Self {
        Self {
            op: "request",
            id,
            request,
        }
    }
}

/// Notifications pushed by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    SceneChanged {
        scene: String,
    },
    SourceListChanged,
    MediaStateChanged {
        source: String,
        playing: bool,
        position_sec: f64,
    },
}

/// Outcome field of a response envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestResult {
    Ok {
        #[serde(default)]
        data: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// Service -> client envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        #[serde(flatten)]
        version: ServiceVersion,
    },
    Response {
        id: u64,
        #[serde(flatten)]
        result: RequestResult,
    },
    Event {
        #[serde(flatten)]
        event: Event,
    },
}

impl ServerMessage {
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(raw)
            .map_err(|e| ConnectionError::Protocol(format!("bad server message: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Typed response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceListPayload {
    pub sources: Vec<CaptureSource>,
}

/// Snapshot result: inline base64 image bytes or a file path the service
/// wrote; at least one must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotPayload {
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub image_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaStatusPayload {
    pub playing: bool,
    pub position_sec: f64,
    pub duration_sec: f64,
}

/// Decode a response `data` value into its typed payload.
pub fn decode_payload<T: serde::de::DeserializeOwned>(
    data: serde_json::Value,
) -> Result<T, ConnectionError> {
    serde_json::from_value(data)
        .map_err(|e| ConnectionError::Protocol(format!("unexpected response shape: {e}")))
}
