//! Blocking WebSocket transport for the capture-control protocol
//!
//! One request is in flight at a time; events that arrive while a
//! response is awaited are queued and handed out through `poll_event`
//! instead of being dropped.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::ConnectionError;
use crate::remote::protocol::{
    Event, Request, RequestEnvelope, RequestResult, ServerMessage, ServiceVersion,
};

/// Session transport used by the remote client.
///
/// Implementations are exercised one call at a time behind the client's
/// transport lock, so they need `Send` but not `Sync`.
pub trait CaptureTransport: Send {
    /// Open the session and return the service's handshake record.
    fn open(&mut self, endpoint: &str, timeout: Duration) -> Result<ServiceVersion, ConnectionError>;

    /// Close the session. Safe to call when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Issue one request and wait for its response `data` payload.
    fn request(&mut self, request: Request) -> Result<serde_json::Value, ConnectionError>;

    /// Next pending service event, waiting up to `timeout` for one.
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<Event>, ConnectionError>;
}

type WsStream = WebSocket<MaybeTlsStream<TcpStream>>;

/// Production transport over blocking tungstenite
pub struct WsTransport {
    socket: Option<WsStream>,
    request_timeout: Duration,
    next_id: u64,
    pending_events: VecDeque<Event>,
}

impl WsTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            socket: None,
            request_timeout,
            next_id: 1,
            pending_events: VecDeque::new(),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        if let Some(ws) = self.socket.as_mut() {
            if let MaybeTlsStream::Plain(stream) = ws.get_mut() {
                // Zero would mean "no timeout"; clamp to something small instead
                let timeout = timeout.max(Duration::from_millis(1));
                let _ = stream.set_read_timeout(Some(timeout));
            }
        }
    }

    /// Read one message, mapping read-timeout I/O errors to `None`.
    fn read_message(&mut self) -> Result<Option<ServerMessage>, ConnectionError> {
        let ws = self.socket.as_mut().ok_or(ConnectionError::NotConnected)?;
        match ws.read() {
            Ok(Message::Text(text)) => ServerMessage::parse(&text).map(Some),
            Ok(Message::Ping(payload)) => {
                let _ = ws.send(Message::Pong(payload));
                Ok(None)
            }
            Ok(Message::Close(_)) => Err(ConnectionError::Closed),
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(ConnectionError::Closed)
            }
            Err(e) => Err(ConnectionError::ReceiveFailed(e.to_string())),
        }
    }
}

impl CaptureTransport for WsTransport {
    fn open(&mut self, endpoint: &str, timeout: Duration) -> Result<ServiceVersion, ConnectionError> {
        self.close();

        let (socket, response) = tungstenite::connect(endpoint)
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;
        tracing::debug!(endpoint, status = %response.status(), "websocket opened");
        self.socket = Some(socket);
        self.pending_events.clear();
        self.set_read_timeout(Duration::from_millis(200));

        // The service speaks first with a hello record
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                self.close();
                return Err(ConnectionError::Timeout);
            }
            match self.read_message() {
                Ok(Some(ServerMessage::Hello { version })) => return Ok(version),
                Ok(Some(ServerMessage::Event { event })) => self.pending_events.push_back(event),
                Ok(Some(ServerMessage::Response { id, .. })) => {
                    tracing::warn!(id, "response before any request, ignoring");
                }
                Ok(None) => continue,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            let _ = ws.close(None);
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn request(&mut self, request: Request) -> Result<serde_json::Value, ConnectionError> {
        let id = self.next_id;
        self.next_id += 1;

        let envelope = RequestEnvelope::new(id, request);
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| ConnectionError::Protocol(format!("encode failed: {e}")))?;

        let ws = self.socket.as_mut().ok_or(ConnectionError::NotConnected)?;
        ws.send(Message::Text(raw))
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;

        let deadline = Instant::now() + self.request_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(ConnectionError::Timeout);
            }
            match self.read_message()? {
                Some(ServerMessage::Response { id: got, result }) if got == id => {
                    return match result {
                        RequestResult::Ok { data } => Ok(data),
                        RequestResult::Error { message } => Err(ConnectionError::Rejected(message)),
                    };
                }
                Some(ServerMessage::Response { id: got, .. }) => {
                    tracing::warn!(expected = id, got, "out-of-order response, skipping");
                }
                Some(ServerMessage::Event { event }) => self.pending_events.push_back(event),
                Some(ServerMessage::Hello { .. }) | None => {}
            }
        }
    }

    fn poll_event(&mut self, timeout: Duration) -> Result<Option<Event>, ConnectionError> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(Some(event));
        }
        if self.socket.is_none() {
            return Err(ConnectionError::NotConnected);
        }

        self.set_read_timeout(timeout);
        let result = match self.read_message()? {
            Some(ServerMessage::Event { event }) => Ok(Some(event)),
            Some(ServerMessage::Response { id, .. }) => {
                tracing::warn!(id, "unsolicited response while polling events");
                Ok(None)
            }
            Some(ServerMessage::Hello { .. }) | None => Ok(None),
        };
        self.set_read_timeout(Duration::from_millis(200));
        result
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
