//! Capture-loop orchestration and frame/audio pairing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::{AudioCapture, AudioSegment};
use crate::config::SyncConfig;
use crate::error::{AudioError, CaptureError, Result, SyncError};
use crate::remote::client::ClientStats;
use crate::remote::{EventSubscriber, RemoteCaptureClient};
use crate::resilience::{health_registry, HealthStatus, TransactionBoundary};
use crate::sync::clip::{self, ClipOutcome};
use crate::sync::frame::{Frame, FrameHistory};

/// Smoothing factor for the measured frame rate
const FPS_EWMA_ALPHA: f64 = 0.2;

/// One video frame paired with the audio segment whose timestamp lies
/// closest to the frame's, after applying the configured sync offset
#[derive(Debug, Clone)]
pub struct SynchronizedSample {
    pub frame: Frame,
    pub audio: AudioSegment,
    /// Measured audio-to-frame distance in milliseconds after the
    /// offset correction; an error bound, not a promise of alignment
    pub sync_delta_ms: i64,
    pub measured_fps: f64,
    /// False when `sync_delta_ms` exceeds the configured tolerance.
    /// The pairing is still returned so callers can down-weight it.
    pub in_tolerance: bool,
}

/// Point-in-time snapshot of the engine for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub connected: bool,
    pub recording: bool,
    pub measured_fps: f64,
    pub frame_history_len: usize,
    pub audio_history_len: usize,
    pub audio_buffer_fill: f32,
    pub sync_offset_ms: i64,
    pub client: ClientStats,
}

struct SyncShared {
    running: AtomicBool,
    frames: Mutex<FrameHistory>,
    audio_history: Mutex<VecDeque<AudioSegment>>,
    sync_offset_ms: AtomicI64,
    measured_fps: Mutex<f64>,
}

/// Owns one remote client and one audio capture, pairing their output.
///
/// A manager never shares its client or capture with another manager;
/// the capture loop is the single writer of both histories.
pub struct SyncManager {
    client: Arc<RemoteCaptureClient>,
    audio: Arc<AudioCapture>,
    config: SyncConfig,
    shared: Arc<SyncShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(client: Arc<RemoteCaptureClient>, audio: Arc<AudioCapture>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(SyncShared {
                running: AtomicBool::new(false),
                frames: Mutex::new(FrameHistory::new(config.frame_history)),
                audio_history: Mutex::new(VecDeque::with_capacity(config.audio_history)),
                sync_offset_ms: AtomicI64::new(config.sync_offset_ms),
                measured_fps: Mutex::new(0.0),
            }),
            client,
            audio,
            config,
            thread: Mutex::new(None),
        }
    }

    /// Connect, start audio, then launch the capture loop. On any
    /// failure the already-started pieces are rolled back and the
    /// tagged error propagates.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = TransactionBoundary::new("engine-start").run(
            |tx| {
                if !self.client.is_connected() {
                    self.client.connect()?;
                }
                tx.mark("remote-connect");
                self.audio.start()?;
                tx.mark("audio-start");
                self.spawn_capture_loop()?;
                tx.mark("capture-loop");
                Ok(())
            },
            |_, tx| {
                if tx.completed().iter().any(|s| s == "audio-start") {
                    self.audio.stop();
                }
            },
        );

        if result.is_err() {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Signal the loop to stop and join it up to `timeout`, then stop
    /// audio regardless of the join outcome. Returns whether the loop
    /// thread actually exited in time.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.shared.running.store(false, Ordering::SeqCst);
        let joined = match self.thread.lock().take() {
            Some(handle) => {
                let deadline = Instant::now() + timeout;
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                if handle.is_finished() {
                    handle.join().is_ok()
                } else {
                    tracing::warn!(?timeout, "capture loop did not stop in time, detaching");
                    false
                }
            }
            None => true,
        };
        self.audio.stop();
        joined
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The newest frame paired with its nearest audio segment.
    ///
    /// Fails with `StaleData` when the newest frame is older than
    /// `max_age_ms`, and with `NoData` when either history is empty;
    /// stale data is never silently substituted.
    pub fn synchronized_sample(&self, max_age_ms: u64) -> Result<SynchronizedSample> {
        let frame = self
            .shared
            .frames
            .lock()
            .newest()
            .cloned()
            .ok_or(SyncError::NoData)?;

        let age_ms = frame.age().as_millis() as u64;
        if age_ms > max_age_ms {
            return Err(SyncError::StaleData { age_ms, max_age_ms }.into());
        }

        let offset_ms = self.shared.sync_offset_ms.load(Ordering::SeqCst);
        let target = offset_instant(frame.captured_at, offset_ms);
        let (audio, sync_delta_ms) = {
            let history = self.shared.audio_history.lock();
            nearest_segment(&history, target).ok_or(SyncError::NoData)?
        };

        let in_tolerance = sync_delta_ms.unsigned_abs() <= self.config.max_sync_diff_ms;
        if !in_tolerance {
            tracing::debug!(
                sync_delta_ms,
                tolerance_ms = self.config.max_sync_diff_ms,
                "pairing outside sync tolerance"
            );
        }

        Ok(SynchronizedSample {
            frame,
            audio,
            sync_delta_ms,
            measured_fps: *self.shared.measured_fps.lock(),
            in_tolerance,
        })
    }

    /// Change the offset used by future pairings. Takes effect without
    /// restarting capture and never alters already-returned samples.
    pub fn adjust_sync_offset(&self, offset_ms: i64) {
        self.shared.sync_offset_ms.store(offset_ms, Ordering::SeqCst);
        tracing::info!(offset_ms, "sync offset adjusted");
    }

    pub fn sync_offset(&self) -> i64 {
        self.shared.sync_offset_ms.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            connected: self.client.is_connected(),
            recording: self.is_running(),
            measured_fps: *self.shared.measured_fps.lock(),
            frame_history_len: self.shared.frames.lock().len(),
            audio_history_len: self.shared.audio_history.lock().len(),
            audio_buffer_fill: self.audio.buffer_fill(),
            sync_offset_ms: self.sync_offset(),
            client: self.client.stats(),
        }
    }

    /// Export the last `duration_secs` of capture as a PNG sequence and
    /// a WAV file. Partial success is reported, not hidden.
    pub fn save_synchronized_clip(&self, duration_secs: u64, prefix: &str) -> ClipOutcome {
        let frames: Vec<Frame> = self
            .shared
            .frames
            .lock()
            .recent(Duration::from_secs(duration_secs));
        let audio = self.audio.segment(duration_secs * 1000);
        clip::save_clip(&self.config.clip_dir, prefix, &frames, &audio)
    }

    /// The remote client this manager owns, for media-control passthrough
    pub fn client(&self) -> &RemoteCaptureClient {
        &self.client
    }

    /// The audio capture this manager owns, for device selection
    pub fn audio(&self) -> &AudioCapture {
        &self.audio
    }

    /// Switch audio input device, restarting the stream if it is live
    pub fn set_audio_device(&self, index: Option<usize>) -> bool {
        if let Err(e) = self.audio.set_device(index) {
            tracing::warn!(?index, error = %e, "audio device selection failed");
            return false;
        }
        if self.audio.is_running() {
            if let Err(e) = self.audio.restart() {
                tracing::error!(error = %e, "audio restart after device change failed");
                return false;
            }
        }
        true
    }

    /// Register liveness probes for the remote link and the audio
    /// stream, keyed under `prefix`.
    pub fn register_health_checks(&self, prefix: &str) {
        let client = self.client.clone();
        health_registry().register(format!("{prefix}.remote"), move || {
            if client.is_connected() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy(format!("connection state: {:?}", client.state()))
            }
        });

        let audio = self.audio.clone();
        health_registry().register(format!("{prefix}.audio"), move || {
            if !audio.is_running() {
                HealthStatus::Warning("audio capture not running".into())
            } else if audio.is_healthy(audio.stale_after()) {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy(audio.last_error().unwrap_or_else(|| {
                    AudioError::StreamStalled(audio.stale_after()).to_string()
                }))
            }
        });
    }

    pub fn unregister_health_checks(prefix: &str) {
        health_registry().unregister(&format!("{prefix}.remote"));
        health_registry().unregister(&format!("{prefix}.audio"));
    }

    fn spawn_capture_loop(&self) -> Result<()> {
        let client = self.client.clone();
        let audio = self.audio.clone();
        let config = self.config.clone();
        let shared = self.shared.clone();

        let handle = thread::Builder::new()
            .name("sync-capture".to_string())
            .spawn(move || capture_loop(client, audio, config, shared))
            .map_err(|e| {
                crate::error::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                ))
            })?;

        *self.thread.lock() = Some(handle);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn push_frame(&self, frame: Frame) {
        self.shared.frames.lock().push(frame);
    }

    #[cfg(test)]
    pub(crate) fn push_audio(&self, segment: AudioSegment) {
        self.shared.audio_history.lock().push_back(segment);
    }
}

fn capture_loop(
    client: Arc<RemoteCaptureClient>,
    audio: Arc<AudioCapture>,
    config: SyncConfig,
    shared: Arc<SyncShared>,
) {
    tracing::info!(target_fps = config.target_fps, "capture loop started");
    let interval = config.frame_interval();
    let mut last_frame_at: Option<Instant> = None;

    while shared.running.load(Ordering::SeqCst) {
        let iteration_start = Instant::now();
        let outcome = capture_iteration(&client, &audio, &config, &shared, &mut last_frame_at);

        // Errors slow the loop down rather than killing it
        let sleep_for = match outcome {
            Ok(()) => interval.saturating_sub(iteration_start.elapsed()),
            Err(e) => {
                tracing::warn!(error = %e, "capture iteration failed");
                interval * 2
            }
        };
        sleep_with_stop(&shared.running, sleep_for);
    }
    tracing::info!("capture loop stopped");
}

/// One pass of the loop: pump events, record audio, grab a frame.
/// Audio keeps flowing even when no video source resolves.
fn capture_iteration(
    client: &RemoteCaptureClient,
    audio: &AudioCapture,
    config: &SyncConfig,
    shared: &SyncShared,
    last_frame_at: &mut Option<Instant>,
) -> Result<()> {
    client.pump_events(Duration::ZERO);

    let segment = audio.segment(config.audio_segment_ms);
    {
        let mut history = shared.audio_history.lock();
        if history.len() == config.audio_history {
            history.pop_front();
        }
        history.push_back(segment);
    }

    if audio.is_running() && !audio.is_healthy(audio.stale_after()) {
        audio.restart()?;
    }

    let source = client
        .resolve_video_source()
        .ok_or(CaptureError::NoSource)?;
    let frame = client.capture_frame(&source)?;
    let now = Instant::now();
    if let Some(prev) = *last_frame_at {
        let dt = now.duration_since(prev).as_secs_f64();
        if dt > 0.0 {
            let mut fps = shared.measured_fps.lock();
            *fps = if *fps == 0.0 {
                1.0 / dt
            } else {
                *fps * (1.0 - FPS_EWMA_ALPHA) + (1.0 / dt) * FPS_EWMA_ALPHA
            };
        }
    }
    *last_frame_at = Some(now);
    shared.frames.lock().push(frame);
    Ok(())
}

/// Sleep in short slices so a stop request is honored promptly
fn sleep_with_stop(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(Duration::from_millis(100)));
    }
}

/// `base` shifted by a signed millisecond offset. Positive offsets move
/// the match target later (audio lags video); an underflowing negative
/// shift clamps to `base`.
fn offset_instant(base: Instant, offset_ms: i64) -> Instant {
    if offset_ms >= 0 {
        base + Duration::from_millis(offset_ms as u64)
    } else {
        base.checked_sub(Duration::from_millis(offset_ms.unsigned_abs()))
            .unwrap_or(base)
    }
}

/// Signed distance from `b` to `a` in milliseconds
fn signed_delta_ms(a: Instant, b: Instant) -> i64 {
    if a >= b {
        a.duration_since(b).as_millis() as i64
    } else {
        -(b.duration_since(a).as_millis() as i64)
    }
}

/// Linear scan for the segment whose timestamp is nearest `target`.
/// The history is small and bounded, so O(n) is fine here.
fn nearest_segment(history: &VecDeque<AudioSegment>, target: Instant) -> Option<(AudioSegment, i64)> {
    let mut best: Option<(usize, i64)> = None;
    for (i, segment) in history.iter().enumerate() {
        let delta = signed_delta_ms(segment.captured_at, target);
        if best.map_or(true, |(_, d)| delta.abs() < d.abs()) {
            best = Some((i, delta));
        }
    }
    best.map(|(i, delta)| (history[i].clone(), delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioConfig, RemoteConfig};
    use crate::remote::mock::{MockState, MockTransport};
    use crate::resilience::CircuitBreakerConfig;
    use crate::sync::frame::FrameOrigin;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    fn test_manager(config: SyncConfig) -> SyncManager {
        let state = Arc::new(StdMutex::new(MockState::default()));
        let client = Arc::new(RemoteCaptureClient::with_breaker_prefix(
            RemoteConfig::default(),
            CircuitBreakerConfig::default(),
            Box::new(MockTransport(state)),
            "test-sync-manager-".to_string(),
        ));
        let audio = Arc::new(AudioCapture::new(AudioConfig::default()));
        SyncManager::new(client, audio, config)
    }

    fn frame_at(age: Duration) -> Frame {
        Frame {
            source: "camera".into(),
            width: 2,
            height: 2,
            pixels: Bytes::from_static(&[0u8; 16]),
            origin: FrameOrigin::Live,
            captured_at: Instant::now() - age,
        }
    }

    fn segment_at(age: Duration) -> AudioSegment {
        AudioSegment {
            samples: vec![0.0; 160],
            sample_rate: 16_000,
            channels: 1,
            captured_at: Instant::now() - age,
        }
    }

    #[test]
    fn iteration_without_a_video_source_errors_but_keeps_audio() {
        let state = Arc::new(StdMutex::new(MockState::default()));
        let client = Arc::new(RemoteCaptureClient::with_breaker_prefix(
            RemoteConfig::default(),
            CircuitBreakerConfig::default(),
            Box::new(MockTransport(state)),
            "test-sync-nosource-".to_string(),
        ));
        client.connect().unwrap();
        let audio = Arc::new(AudioCapture::new(AudioConfig::default()));
        let manager = SyncManager::new(client, audio, SyncConfig::default());

        let mut last_frame_at = None;
        let outcome = capture_iteration(
            &manager.client,
            &manager.audio,
            &manager.config,
            &manager.shared,
            &mut last_frame_at,
        );
        match outcome {
            Err(crate::error::Error::Capture(CaptureError::NoSource)) => {}
            other => panic!("expected NoSource, got {other:?}"),
        }
        // Audio history still advances while video has nothing to grab
        assert_eq!(manager.shared.audio_history.lock().len(), 1);
        assert!(manager.shared.frames.lock().newest().is_none());
        manager.client.disconnect();
    }

    #[test]
    fn empty_histories_report_no_data() {
        let manager = test_manager(SyncConfig::default());
        match manager.synchronized_sample(1_000) {
            Err(crate::error::Error::Sync(SyncError::NoData)) => {}
            other => panic!("expected NoData, got {other:?}"),
        }
    }

    #[test]
    fn stale_frame_is_rejected_not_substituted() {
        let manager = test_manager(SyncConfig::default());
        manager.push_frame(frame_at(Duration::from_millis(1_500)));
        manager.push_audio(segment_at(Duration::from_millis(1_500)));

        match manager.synchronized_sample(1_000) {
            Err(crate::error::Error::Sync(SyncError::StaleData { age_ms, max_age_ms })) => {
                assert!(age_ms >= 1_500);
                assert_eq!(max_age_ms, 1_000);
            }
            other => panic!("expected StaleData, got {other:?}"),
        }
    }

    #[test]
    fn nearest_audio_segment_wins() {
        let manager = test_manager(SyncConfig::default());
        manager.push_frame(frame_at(Duration::from_millis(200)));
        manager.push_audio(segment_at(Duration::from_millis(800)));
        manager.push_audio(segment_at(Duration::from_millis(210)));
        manager.push_audio(segment_at(Duration::from_millis(600)));

        let sample = manager.synchronized_sample(1_000).unwrap();
        // Best pairing is ~10ms apart, well inside tolerance
        assert!(sample.sync_delta_ms.abs() <= 50, "delta {}", sample.sync_delta_ms);
        assert!(sample.in_tolerance);
    }

    #[test]
    fn out_of_tolerance_pairings_are_flagged_not_dropped() {
        let config = SyncConfig {
            max_sync_diff_ms: 150,
            ..Default::default()
        };
        let manager = test_manager(config);
        manager.push_frame(frame_at(Duration::from_millis(100)));
        manager.push_audio(segment_at(Duration::from_millis(700)));

        let sample = manager.synchronized_sample(1_000).unwrap();
        assert!(!sample.in_tolerance);
        assert!(sample.sync_delta_ms.abs() > 150);
    }

    #[test]
    fn offset_moves_the_match_target() {
        let manager = test_manager(SyncConfig::default());
        manager.push_frame(frame_at(Duration::from_millis(500)));
        // One segment right at the frame, one 400ms later
        manager.push_audio(segment_at(Duration::from_millis(500)));
        manager.push_audio(segment_at(Duration::from_millis(100)));

        let aligned = manager.synchronized_sample(1_000).unwrap();
        assert!(aligned.sync_delta_ms.abs() <= 50);

        // Audio lags by 400ms: the later segment should now win
        manager.adjust_sync_offset(400);
        let shifted = manager.synchronized_sample(1_000).unwrap();
        assert!(shifted.sync_delta_ms.abs() <= 50);
        assert!(shifted.audio.captured_at > aligned.audio.captured_at);
    }

    #[test]
    fn adjust_offset_does_not_alter_returned_samples() {
        let manager = test_manager(SyncConfig::default());
        manager.push_frame(frame_at(Duration::from_millis(100)));
        manager.push_audio(segment_at(Duration::from_millis(100)));

        let before = manager.synchronized_sample(1_000).unwrap();
        manager.adjust_sync_offset(5_000);
        assert_eq!(manager.sync_offset(), 5_000);
        // The sample taken earlier keeps its original pairing
        assert!(before.sync_delta_ms.abs() <= 50);
    }

    #[test]
    fn status_reflects_history_and_offset() {
        let manager = test_manager(SyncConfig::default());
        manager.push_frame(frame_at(Duration::from_millis(10)));
        manager.push_audio(segment_at(Duration::from_millis(10)));
        manager.adjust_sync_offset(-25);

        let status = manager.status();
        assert!(!status.connected);
        assert!(!status.recording);
        assert_eq!(status.frame_history_len, 1);
        assert_eq!(status.audio_history_len, 1);
        assert_eq!(status.sync_offset_ms, -25);
    }

    #[test]
    fn signed_delta_is_symmetric() {
        let now = Instant::now();
        let later = now + Duration::from_millis(120);
        assert_eq!(signed_delta_ms(later, now), 120);
        assert_eq!(signed_delta_ms(now, later), -120);
        assert_eq!(signed_delta_ms(now, now), 0);
    }

    #[test]
    fn nearest_segment_on_empty_history_is_none() {
        let history = VecDeque::new();
        assert!(nearest_segment(&history, Instant::now()).is_none());
    }
}
