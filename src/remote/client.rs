//! Remote capture client: connection lifecycle, snapshots, media control
//!
//! Owns the single session to the capture-control service. Transport
//! failures never spin the caller: snapshot failures degrade to the last
//! known-good frame under an escalating backoff, media calls fall back to
//! cached playback state, and a dropped session is rebuilt by a
//! dedicated reconnect thread with capped exponential backoff.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine as _;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::RemoteConfig;
use crate::error::{CaptureError, ConnectionError, Error, MediaControlError, Result};
use crate::remote::media::{MediaPlaybackState, MediaStateCache};
use crate::remote::protocol::{
    decode_payload, CaptureSource, Event, MediaAction, MediaStatusPayload, Request, ServiceVersion,
    SnapshotPayload, SourceKind, SourceListPayload,
};
use crate::remote::transport::CaptureTransport;
use crate::remote::{EventSubscriber, MediaController, SourceLister};
use crate::resilience::{breaker_registry, CircuitBreakerConfig, RetryStrategy};
use crate::sync::frame::Frame;

/// Session state; owned exclusively by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Escalating backoff for a flapping snapshot path.
///
/// Every `error_threshold` consecutive failures suspends snapshot RPCs
/// for the current interval and doubles it (capped); the next success
/// resets everything.
#[derive(Debug)]
pub(crate) struct CaptureBackoff {
    error_threshold: u32,
    initial: Duration,
    max: Duration,
    consecutive_errors: u32,
    current: Duration,
    suspended_until: Option<Instant>,
}

impl CaptureBackoff {
    pub(crate) fn new(error_threshold: u32, initial: Duration, max: Duration) -> Self {
        Self {
            error_threshold: error_threshold.max(1),
            initial,
            max,
            consecutive_errors: 0,
            current: initial,
            suspended_until: None,
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_errors += 1;
        if self.consecutive_errors % self.error_threshold == 0 {
            self.suspended_until = Some(Instant::now() + self.current);
            tracing::warn!(
                errors = self.consecutive_errors,
                backoff_ms = self.current.as_millis() as u64,
                "snapshot path flapping, suspending capture"
            );
            self.current = (self.current * 2).min(self.max);
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.current = self.initial;
        self.suspended_until = None;
    }

    /// Remaining suspension, if the capture path is currently backing off
    pub(crate) fn suspended_remaining(&mut self) -> Option<Duration> {
        match self.suspended_until {
            Some(until) => {
                let now = Instant::now();
                if now < until {
                    Some(until - now)
                } else {
                    self.suspended_until = None;
                    None
                }
            }
            None => None,
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    frames_captured: AtomicU64,
    fallback_frames: AtomicU64,
    snapshot_errors: AtomicU64,
    media_errors: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time counters for status reporting
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ClientStats {
    pub frames_captured: u64,
    pub fallback_frames: u64,
    pub snapshot_errors: u64,
    pub media_errors: u64,
    pub reconnects: u64,
}

struct ClientInner {
    // Set at construction via Arc::new_cyclic; lets transport-error paths
    // hand an owned Arc to the reconnect thread.
    this: std::sync::Weak<ClientInner>,
    config: RemoteConfig,
    breaker_config: CircuitBreakerConfig,
    breaker_prefix: String,
    transport: Mutex<Box<dyn CaptureTransport>>,
    state: Mutex<ConnectionState>,
    version: Mutex<Option<ServiceVersion>>,
    sources: RwLock<Vec<CaptureSource>>,
    media: MediaStateCache,
    last_good_frame: Mutex<Option<Frame>>,
    backoff: Mutex<CaptureBackoff>,
    reconnect_running: AtomicBool,
    stopping: AtomicBool,
    disconnected_at: Mutex<Option<Instant>>,
    stats: StatsInner,
}

/// Client for the remote capture-control service
pub struct RemoteCaptureClient {
    inner: Arc<ClientInner>,
}

impl RemoteCaptureClient {
    pub fn new(
        config: RemoteConfig,
        breaker_config: CircuitBreakerConfig,
        transport: Box<dyn CaptureTransport>,
    ) -> Self {
        Self::with_breaker_prefix(config, breaker_config, transport, String::new())
    }

    /// Breaker names are process-wide; a prefix isolates independent
    /// deployments (and tests) that must not share gate state.
    pub fn with_breaker_prefix(
        config: RemoteConfig,
        breaker_config: CircuitBreakerConfig,
        transport: Box<dyn CaptureTransport>,
        breaker_prefix: String,
    ) -> Self {
        use crate::constants::{CAPTURE_BACKOFF_INITIAL_MS, CAPTURE_BACKOFF_MAX_MS};
        Self {
            inner: Arc::new_cyclic(|this| ClientInner {
                this: this.clone(),
                config,
                breaker_config,
                breaker_prefix,
                transport: Mutex::new(transport),
                state: Mutex::new(ConnectionState::Disconnected),
                version: Mutex::new(None),
                sources: RwLock::new(Vec::new()),
                media: MediaStateCache::new(),
                last_good_frame: Mutex::new(None),
                backoff: Mutex::new(CaptureBackoff::new(
                    3,
                    Duration::from_millis(CAPTURE_BACKOFF_INITIAL_MS),
                    Duration::from_millis(CAPTURE_BACKOFF_MAX_MS),
                )),
                reconnect_running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                disconnected_at: Mutex::new(None),
                stats: StatsInner::default(),
            }),
        }
    }

    /// Open the session, fetch the service version and source list.
    ///
    /// On failure the state goes back to DISCONNECTED and the reconnect
    /// loop starts (unless one is already running).
    pub fn connect(&self) -> Result<()> {
        self.inner.stopping.store(false, Ordering::SeqCst);
        match ClientInner::connect_once(&self.inner, false) {
            Ok(()) => Ok(()),
            Err(err) => {
                ClientInner::spawn_reconnect_loop(self.inner.clone());
                Err(err)
            }
        }
    }

    /// Tear down the session and cancel any reconnect loop. Terminal
    /// until the next explicit `connect`.
    pub fn disconnect(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.transport.lock().close();
        *self.inner.disconnected_at.lock() = None;
        tracing::info!("remote client disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn service_version(&self) -> Option<ServiceVersion> {
        self.inner.version.lock().clone()
    }

    pub fn stats(&self) -> ClientStats {
        let s = &self.inner.stats;
        ClientStats {
            frames_captured: s.frames_captured.load(Ordering::Relaxed),
            fallback_frames: s.fallback_frames.load(Ordering::Relaxed),
            snapshot_errors: s.snapshot_errors.load(Ordering::Relaxed),
            media_errors: s.media_errors.load(Ordering::Relaxed),
            reconnects: s.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Refresh the cached source list from the service
    pub fn refresh_sources(&self) -> Result<Vec<CaptureSource>> {
        let data = self.inner.rpc(Request::ListSources)?;
        let payload: SourceListPayload = decode_payload(data).map_err(Error::from)?;
        *self.inner.sources.write() = payload.sources.clone();
        tracing::debug!(count = payload.sources.len(), "source list refreshed");
        Ok(payload.sources)
    }

    /// The video source to capture: the configured name, or the first
    /// discovered video source.
    pub fn resolve_video_source(&self) -> Option<String> {
        if !self.inner.config.video_source.is_empty() {
            return Some(self.inner.config.video_source.clone());
        }
        self.inner
            .sources
            .read()
            .iter()
            .find(|s| s.kind == SourceKind::Video)
            .map(|s| s.name.clone())
    }

    /// Capture one frame from `source`.
    ///
    /// On transport or decode failure the last known-good frame (or a
    /// placeholder) is substituted when `snapshot.fallback` is enabled;
    /// otherwise the error propagates. Repeated failures suspend the
    /// snapshot RPC under [`CaptureBackoff`].
    pub fn capture_frame(&self, source: &str) -> Result<Frame> {
        let inner = &self.inner;

        if let Some(remaining) = inner.backoff.lock().suspended_remaining() {
            return inner.fallback_or(source, CaptureError::BackedOff(remaining));
        }

        if inner.state() != ConnectionState::Connected {
            return inner.fallback_or(source, CaptureError::SnapshotFailed("not connected".into()));
        }

        let breaker = breaker_registry().get_or_create(
            &inner.breaker_name("snapshot"),
            inner.breaker_config.clone(),
        );
        let snapshot = breaker.call(|| inner.snapshot_rpc(source));

        match snapshot {
            Ok(frame) => {
                inner.backoff.lock().record_success();
                *inner.last_good_frame.lock() = Some(frame.clone());
                inner.stats.frames_captured.fetch_add(1, Ordering::Relaxed);
                Ok(frame)
            }
            Err(err) => {
                inner.stats.snapshot_errors.fetch_add(1, Ordering::Relaxed);
                inner.backoff.lock().record_failure();
                inner.note_connection_loss(&err);
                tracing::warn!(source, error = %err, "snapshot failed, serving fallback");
                match err {
                    Error::Capture(capture_err) => inner.fallback_or(source, capture_err),
                    other => {
                        inner.fallback_or(source, CaptureError::SnapshotFailed(other.to_string()))
                    }
                }
            }
        }
    }
}

impl ClientInner {
    fn breaker_name(&self, op: &str) -> String {
        format!("{}{op}", self.breaker_prefix)
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut guard = self.state.lock();
        if *guard != state {
            tracing::info!(from = ?*guard, to = ?state, "connection state changed");
            *guard = state;
        }
    }

    /// One connect attempt: open, handshake, refresh sources.
    fn connect_once(inner: &Arc<Self>, reconnecting: bool) -> Result<()> {
        inner.set_state(if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let open_result = {
            let mut transport = inner.transport.lock();
            transport.open(&inner.config.endpoint, inner.config.request_timeout())
        };

        let version = match open_result {
            Ok(version) => version,
            Err(err) => {
                inner.set_state(ConnectionState::Disconnected);
                if inner.disconnected_at.lock().is_none() {
                    *inner.disconnected_at.lock() = Some(Instant::now());
                }
                return Err(err.into());
            }
        };

        tracing::info!(
            service_version = %version.service_version,
            rpc_version = version.rpc_version,
            "connected to capture-control service"
        );
        *inner.version.lock() = Some(version);

        // Source discovery failure is a failed connect, not a degraded one
        let data = {
            let mut transport = inner.transport.lock();
            transport.request(Request::ListSources)
        };
        match data.and_then(|d| decode_payload::<SourceListPayload>(d)) {
            Ok(payload) => {
                *inner.sources.write() = payload.sources;
            }
            Err(err) => {
                inner.transport.lock().close();
                inner.set_state(ConnectionState::Disconnected);
                return Err(err.into());
            }
        }

        inner.set_state(ConnectionState::Connected);

        // A disconnect that raced in while the handshake was in flight
        // wins: tear the fresh session straight back down
        if inner.stopping.load(Ordering::SeqCst) {
            inner.transport.lock().close();
            inner.set_state(ConnectionState::Disconnected);
            return Err(ConnectionError::Closed.into());
        }

        if let Some(since) = inner.disconnected_at.lock().take() {
            tracing::info!(
                downtime_ms = since.elapsed().as_millis() as u64,
                "service recovered"
            );
        }
        Ok(())
    }

    fn spawn_reconnect_loop(inner: Arc<Self>) {
        if inner.reconnect_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let thread_inner = Arc::clone(&inner);
        let spawn = thread::Builder::new()
            .name("remote-reconnect".to_string())
            .spawn(move || {
                let inner = thread_inner;
                let cfg = inner.config.reconnect.clone();
                let strategy = RetryStrategy::exponential(
                    Duration::from_millis(cfg.base_interval_ms),
                    cfg.factor,
                    Duration::from_millis(cfg.max_interval_ms),
                );

                let mut attempt: u32 = 0;
                loop {
                    if inner.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    attempt += 1;
                    if cfg.max_attempts != 0 && attempt > cfg.max_attempts {
                        tracing::error!(
                            attempts = cfg.max_attempts,
                            "reconnect attempts exhausted, giving up"
                        );
                        inner.set_state(ConnectionState::Disconnected);
                        break;
                    }

                    let delay = strategy.next_delay(attempt);
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    if !sleep_interruptible(&inner.stopping, delay) {
                        break;
                    }

                    match Self::connect_once(&inner, true) {
                        Ok(()) => {
                            inner.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                        Err(err) => {
                            tracing::warn!(attempt, error = %err, "reconnect attempt failed");
                        }
                    }
                }
                inner.reconnect_running.store(false, Ordering::SeqCst);
            });

        if let Err(e) = spawn {
            tracing::error!(error = %e, "failed to spawn reconnect thread");
            inner.reconnect_running.store(false, Ordering::SeqCst);
        }
    }

    /// Force RECONNECTING when a transport error says the session is gone
    fn note_connection_loss(&self, err: &Error) {
        let lost = match err {
            Error::Connection(ce) => ce.is_connection_loss(),
            _ => false,
        };
        if !lost || self.state() != ConnectionState::Connected {
            return;
        }
        tracing::warn!(error = %err, "connection loss detected");
        self.set_state(ConnectionState::Reconnecting);
        if self.disconnected_at.lock().is_none() {
            *self.disconnected_at.lock() = Some(Instant::now());
        }
        self.transport.lock().close();
        if let Some(inner) = self.this.upgrade() {
            Self::spawn_reconnect_loop(inner);
        }
    }

    fn rpc(&self, request: Request) -> Result<serde_json::Value> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected.into());
        }
        let result = {
            let mut transport = self.transport.lock();
            transport.request(request)
        };
        result.map_err(|err| {
            let err = Error::from(err);
            self.note_connection_loss(&err);
            err
        })
    }

    fn snapshot_rpc(&self, source: &str) -> Result<Frame> {
        let snap = &self.config.snapshot;
        let data = self.rpc(Request::TakeSnapshot {
            source: source.to_string(),
            format: snap.format.clone(),
            width: snap.width,
            height: snap.height,
            quality: snap.quality,
        })?;
        let payload: SnapshotPayload = decode_payload(data)?;
        decode_snapshot(source, payload).map_err(Error::from)
    }

    /// Last known-good frame, else a placeholder, else the given error
    /// when fallback frames are disabled.
    fn fallback_or(&self, source: &str, err: CaptureError) -> Result<Frame> {
        if !self.config.snapshot.fallback {
            return Err(err.into());
        }
        self.stats.fallback_frames.fetch_add(1, Ordering::Relaxed);
        if let Some(frame) = self.last_good_frame.lock().as_ref() {
            return Ok(frame.as_last_good());
        }
        Ok(Frame::placeholder(
            source,
            self.config.snapshot.width,
            self.config.snapshot.height,
        ))
    }

    fn handle_event(&self, event: Event) -> bool {
        match event {
            Event::SceneChanged { scene } => {
                tracing::info!(scene, "scene changed, source refresh needed");
                true
            }
            Event::SourceListChanged => true,
            Event::MediaStateChanged {
                source,
                playing,
                position_sec,
            } => {
                self.media.apply_event(&source, playing, position_sec);
                false
            }
        }
    }
}

/// Decode an inline or on-disk snapshot payload into an RGBA frame
fn decode_snapshot(source: &str, payload: SnapshotPayload) -> std::result::Result<Frame, CaptureError> {
    let bytes = if let Some(data) = payload.image_data {
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| CaptureError::DecodeFailed(format!("base64: {e}")))?
    } else if let Some(path) = payload.image_file {
        std::fs::read(&path).map_err(|e| CaptureError::DecodeFailed(format!("{path}: {e}")))?
    } else {
        return Err(CaptureError::EmptySnapshot);
    };

    let image = image::load_from_memory(&bytes)
        .map_err(|e| CaptureError::DecodeFailed(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Frame::new(source, width, height, Bytes::from(rgba.into_raw())))
}

/// Sleep in short slices so a stop flag interrupts promptly.
/// Returns false when interrupted.
fn sleep_interruptible(stop: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(remaining.min(Duration::from_millis(100)));
    }
    !stop.load(Ordering::SeqCst)
}

impl SourceLister for RemoteCaptureClient {
    fn sources(&self) -> Vec<CaptureSource> {
        self.inner.sources.read().clone()
    }
}

impl MediaController for RemoteCaptureClient {
    fn control_media(
        &self,
        source: &str,
        action: MediaAction,
        position_sec: Option<f64>,
    ) -> Result<()> {
        if action == MediaAction::Seek {
            match position_sec {
                Some(pos) if pos >= 0.0 => {}
                Some(pos) => return Err(MediaControlError::InvalidPosition(pos).into()),
                None => return Err(MediaControlError::InvalidPosition(-1.0).into()),
            }
        }

        let inner = &self.inner;
        let breaker = breaker_registry().get_or_create(
            &inner.breaker_name("media-control"),
            inner.breaker_config.clone(),
        );

        let result = breaker.call(|| {
            inner
                .rpc(Request::MediaControl {
                    source: source.to_string(),
                    action,
                    position_sec,
                })
                .map(|_| ())
        });

        match result {
            Ok(()) => {
                inner.media.apply_action(source, action, position_sec);
                Ok(())
            }
            Err(err) => {
                inner.stats.media_errors.fetch_add(1, Ordering::Relaxed);
                match err {
                    Error::Connection(ConnectionError::Rejected(msg)) => {
                        Err(MediaControlError::RequestFailed(msg).into())
                    }
                    other => Err(other),
                }
            }
        }
    }

    fn media_properties(&self, source: &str) -> Result<MediaPlaybackState> {
        let inner = &self.inner;
        let breaker = breaker_registry().get_or_create(
            &inner.breaker_name("media-control"),
            inner.breaker_config.clone(),
        );

        let result = breaker.call(|| {
            let data = inner.rpc(Request::GetMediaStatus {
                source: source.to_string(),
            })?;
            let payload: MediaStatusPayload = decode_payload(data)?;
            inner.media.update_from_status(source, &payload);
            Ok(())
        });

        match result {
            Ok(()) => inner
                .media
                .get(source)
                .ok_or_else(|| MediaControlError::SourceNotFound(source.to_string()).into()),
            Err(err) => {
                inner.stats.media_errors.fetch_add(1, Ordering::Relaxed);
                // Circuit open or transport failure: serve the cache
                match inner.media.get(source) {
                    Some(cached) => {
                        tracing::debug!(source, error = %err, "serving cached media state");
                        Ok(cached)
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn media_time(&self, source: &str) -> Result<MediaPlaybackState> {
        // Same RPC and fallback policy; kept separate so callers that only
        // need position read as such.
        self.media_properties(source)
    }
}

impl EventSubscriber for RemoteCaptureClient {
    fn pump_events(&self, max_wait: Duration) -> usize {
        let inner = &self.inner;
        if inner.state() != ConnectionState::Connected {
            return 0;
        }

        let mut events = Vec::new();
        {
            let mut transport = inner.transport.lock();
            let mut wait = max_wait;
            loop {
                match transport.poll_event(wait) {
                    Ok(Some(event)) => {
                        events.push(event);
                        // Only the first poll blocks; drain the rest
                        wait = Duration::ZERO;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let err = Error::from(err);
                        drop(transport);
                        inner.note_connection_loss(&err);
                        break;
                    }
                }
            }
        }

        let count = events.len();
        let mut refresh = false;
        for event in events {
            refresh |= inner.handle_event(event);
        }
        if refresh {
            if let Err(err) = self.refresh_sources() {
                tracing::warn!(error = %err, "source refresh after event failed");
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReconnectConfig, SnapshotConfig};
    use crate::remote::mock::{png_snapshot_json, video_source, MockState, MockTransport};
    use crate::sync::frame::FrameOrigin;
    use std::sync::Mutex as StdMutex;

    fn test_config() -> RemoteConfig {
        RemoteConfig {
            endpoint: "ws://test".into(),
            request_timeout_ms: 100,
            video_source: String::new(),
            snapshot: SnapshotConfig::default(),
            reconnect: ReconnectConfig {
                base_interval_ms: 5,
                factor: 1.5,
                max_interval_ms: 20,
                max_attempts: 2,
            },
        }
    }

    fn breaker_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }

    fn client_with(
        state: Arc<StdMutex<MockState>>,
        config: RemoteConfig,
        threshold: u32,
        prefix: &str,
    ) -> RemoteCaptureClient {
        RemoteCaptureClient::with_breaker_prefix(
            config,
            breaker_config(threshold),
            Box::new(MockTransport(state)),
            format!("test-{prefix}-"),
        )
    }

    #[test]
    fn connect_caches_sources_and_sets_state() {
        let state = Arc::new(StdMutex::new(MockState {
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state, test_config(), 5, "connect");

        client.connect().unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.sources(), vec![video_source("camera")]);
        assert_eq!(
            client.service_version().unwrap().service_version,
            "1.0-test"
        );
        assert_eq!(client.resolve_video_source().as_deref(), Some("camera"));
        client.disconnect();
    }

    #[test]
    fn failed_connect_goes_disconnected_and_retries() {
        let state = Arc::new(StdMutex::new(MockState {
            open_should_fail: true,
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state.clone(), test_config(), 5, "retry");

        assert!(client.connect().is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Let the reconnect loop win once the service comes back
        state.lock().unwrap().open_should_fail = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while client.state() != ConnectionState::Connected && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(state.lock().unwrap().open_calls >= 2);
        client.disconnect();
    }

    #[test]
    fn disconnect_during_reconnect_attempt_is_terminal() {
        let state = Arc::new(StdMutex::new(MockState {
            open_should_fail: true,
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let mut config = test_config();
        config.reconnect.base_interval_ms = 10;
        config.reconnect.max_attempts = 0;
        let client = client_with(state.clone(), config, 5, "disconnect-race");
        assert!(client.connect().is_err());

        // Next attempt will succeed, but slowly; disconnect lands while
        // the reconnect thread is mid-handshake
        {
            let mut s = state.lock().unwrap();
            s.open_should_fail = false;
            s.open_delay = Duration::from_millis(300);
        }
        thread::sleep(Duration::from_millis(100));
        client.disconnect();
        thread::sleep(Duration::from_millis(400));

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!state.lock().unwrap().is_open);
    }

    #[test]
    fn snapshot_failure_serves_last_good_then_placeholder() {
        let state = Arc::new(StdMutex::new(MockState {
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state.clone(), test_config(), 50, "fallback");
        client.connect().unwrap();

        // No good frame yet: placeholder
        let frame = client.capture_frame("camera").unwrap();
        assert_eq!(frame.origin, FrameOrigin::Placeholder);

        // A live frame, then a failure served from last-good
        state.lock().unwrap().snapshots.push_back(Ok(png_snapshot_json()));
        let live = client.capture_frame("camera").unwrap();
        assert_eq!(live.origin, FrameOrigin::Live);
        assert_eq!((live.width, live.height), (2, 2));

        let fallback = client.capture_frame("camera").unwrap();
        assert_eq!(fallback.origin, FrameOrigin::LastGood);
        assert_eq!(fallback.pixels, live.pixels);

        let stats = client.stats();
        assert_eq!(stats.frames_captured, 1);
        assert!(stats.fallback_frames >= 2);
        client.disconnect();
    }

    #[test]
    fn fallback_disabled_propagates_snapshot_errors() {
        let mut config = test_config();
        config.snapshot.fallback = false;
        let state = Arc::new(StdMutex::new(MockState {
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state, config, 50, "strict");
        client.connect().unwrap();

        let result = client.capture_frame("camera");
        assert!(matches!(result, Err(Error::Capture(_))));
        client.disconnect();
    }

    #[test]
    fn media_circuit_opens_and_serves_cached_state() {
        let state = Arc::new(StdMutex::new(MockState {
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state.clone(), test_config(), 2, "media");
        client.connect().unwrap();

        // Successful play populates the cache optimistically
        state
            .lock()
            .unwrap()
            .media_results
            .push_back(Ok(serde_json::json!({})));
        client.control_media("clip", MediaAction::Play, None).unwrap();

        // Two failures trip the breaker (threshold 2)
        for _ in 0..2 {
            state
                .lock()
                .unwrap()
                .media_results
                .push_back(Err(ConnectionError::Rejected("busy".into())));
            assert!(client
                .control_media("clip", MediaAction::Pause, None)
                .is_err());
        }

        // Circuit open: control fails fast, properties serve the cache
        let result = client.control_media("clip", MediaAction::Play, None);
        assert!(matches!(
            result,
            Err(Error::Resilience(crate::error::ResilienceError::CircuitOpen(_)))
        ));
        let cached = client.media_properties("clip").unwrap();
        assert!(cached.playing);
        client.disconnect();
    }

    #[test]
    fn seek_requires_a_valid_position() {
        let state = Arc::new(StdMutex::new(MockState::default()));
        let client = client_with(state, test_config(), 5, "seek");

        assert!(matches!(
            client.control_media("clip", MediaAction::Seek, None),
            Err(Error::MediaControl(MediaControlError::InvalidPosition(_)))
        ));
        assert!(matches!(
            client.control_media("clip", MediaAction::Seek, Some(-2.0)),
            Err(Error::MediaControl(MediaControlError::InvalidPosition(_)))
        ));
    }

    #[test]
    fn events_refresh_sources_and_media_cache() {
        let state = Arc::new(StdMutex::new(MockState {
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state.clone(), test_config(), 5, "events");
        client.connect().unwrap();

        {
            let mut s = state.lock().unwrap();
            s.sources = vec![video_source("camera"), video_source("screen")];
            s.events.push_back(Event::SceneChanged {
                scene: "live".into(),
            });
            s.events.push_back(Event::MediaStateChanged {
                source: "clip".into(),
                playing: true,
                position_sec: 9.0,
            });
        }

        let handled = client.pump_events(Duration::from_millis(10));
        assert_eq!(handled, 2);
        assert_eq!(client.sources().len(), 2);
        let media = client.media_properties("clip").unwrap();
        assert_eq!(media.position_sec, 9.0);
        client.disconnect();
    }

    #[test]
    fn capture_backoff_doubles_and_caps() {
        let mut backoff = CaptureBackoff::new(
            3,
            Duration::from_secs(5),
            Duration::from_secs(60),
        );

        // Two failures: not yet suspended
        backoff.record_failure();
        backoff.record_failure();
        assert!(backoff.suspended_remaining().is_none());

        // Third failure suspends for ~5s and escalates to 10s
        backoff.record_failure();
        let remaining = backoff.suspended_remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert_eq!(backoff.current, Duration::from_secs(10));

        // Escalation caps at the maximum
        for _ in 0..20 {
            backoff.record_failure();
        }
        assert_eq!(backoff.current, Duration::from_secs(60));

        backoff.record_success();
        assert!(backoff.suspended_remaining().is_none());
        assert_eq!(backoff.current, Duration::from_secs(5));
    }

    #[test]
    fn backed_off_capture_skips_the_rpc() {
        let state = Arc::new(StdMutex::new(MockState {
            sources: vec![video_source("camera")],
            ..Default::default()
        }));
        let client = client_with(state.clone(), test_config(), 50, "backoff");
        client.connect().unwrap();

        // Trip the backoff threshold (3 consecutive failures)
        for _ in 0..3 {
            let _ = client.capture_frame("camera");
        }
        let rpc_failures = client.stats().snapshot_errors;

        // While suspended, no further snapshot RPC errors accumulate
        let frame = client.capture_frame("camera").unwrap();
        assert_ne!(frame.origin, FrameOrigin::Live);
        assert_eq!(client.stats().snapshot_errors, rpc_failures);
        client.disconnect();
    }
}
