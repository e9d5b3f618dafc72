//! Scriptable in-memory transport for tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use base64::Engine;

use crate::error::ConnectionError;
use crate::remote::protocol::{CaptureSource, Event, Request, ServiceVersion, SourceKind};
use crate::remote::transport::CaptureTransport;

#[derive(Default)]
pub(crate) struct MockState {
    pub open_should_fail: bool,
    /// Simulated handshake latency for the next `open` calls
    pub open_delay: Duration,
    pub open_calls: u32,
    pub is_open: bool,
    pub sources: Vec<CaptureSource>,
    pub snapshots: VecDeque<Result<serde_json::Value, ConnectionError>>,
    pub media_results: VecDeque<Result<serde_json::Value, ConnectionError>>,
    pub events: VecDeque<Event>,
}

pub(crate) struct MockTransport(pub Arc<StdMutex<MockState>>);

impl CaptureTransport for MockTransport {
    fn open(
        &mut self,
        _endpoint: &str,
        _timeout: Duration,
    ) -> Result<ServiceVersion, ConnectionError> {
        let delay = {
            let mut state = self.0.lock().unwrap();
            state.open_calls += 1;
            if state.open_should_fail {
                return Err(ConnectionError::ConnectFailed("connection refused".into()));
            }
            state.open_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.0.lock().unwrap().is_open = true;
        Ok(ServiceVersion {
            service_version: "1.0-test".into(),
            rpc_version: 1,
            platform: None,
        })
    }

    fn close(&mut self) {
        self.0.lock().unwrap().is_open = false;
    }

    fn is_open(&self) -> bool {
        self.0.lock().unwrap().is_open
    }

    fn request(&mut self, request: Request) -> Result<serde_json::Value, ConnectionError> {
        let mut state = self.0.lock().unwrap();
        match request {
            Request::ListSources => Ok(serde_json::json!({ "sources": state.sources })),
            Request::TakeSnapshot { .. } => state
                .snapshots
                .pop_front()
                .unwrap_or_else(|| Err(ConnectionError::Rejected("no snapshot".into()))),
            Request::MediaControl { .. } | Request::GetMediaStatus { .. } => state
                .media_results
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({}))),
        }
    }

    fn poll_event(&mut self, _timeout: Duration) -> Result<Option<Event>, ConnectionError> {
        Ok(self.0.lock().unwrap().events.pop_front())
    }
}

pub(crate) fn video_source(name: &str) -> CaptureSource {
    CaptureSource {
        name: name.into(),
        kind: SourceKind::Video,
    }
}

/// A 2x2 white PNG snapshot payload, encoded on the fly
pub(crate) fn png_snapshot_json() -> serde_json::Value {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 255, 255]));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    serde_json::json!({ "image_data": encoded })
}
