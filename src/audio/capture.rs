//! Continuous audio capture from a local input device
//!
//! The cpal callback runs on a library-owned thread and must never
//! block: it hands each chunk over a bounded channel to a consumer
//! thread that owns writes into the circular sample buffer. A stalled
//! stream is visible through `is_healthy` and recovered by the caller's
//! supervising loop via `restart`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;

use crate::audio::device::device_by_index;
use crate::audio::ring::SampleRing;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Channel depth between the device callback and the consumer. At the
/// default chunk size this is several seconds of slack.
const CHUNK_CHANNEL_DEPTH: usize = 64;

/// One audio read: a copy of recent samples plus its reference timestamp
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Interleaved f32 samples, zero-filled at the front when the ring
    /// has not yet accumulated enough data
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Wall-clock instant of the newest sample in this segment
    pub captured_at: Instant,
}

impl AudioSegment {
    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }
}

struct Chunk {
    samples: Vec<f32>,
    at: Instant,
}

struct CaptureShared {
    running: AtomicBool,
    ring: Mutex<SampleRing>,
    last_write: Mutex<Option<Instant>>,
    started_at: Mutex<Option<Instant>>,
    stream_error: Mutex<Option<AudioError>>,
}

/// Streaming capture from one input device
pub struct AudioCapture {
    config: Mutex<AudioConfig>,
    shared: Arc<CaptureShared>,
    stream_thread: Mutex<Option<JoinHandle<()>>>,
    consumer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioCapture {
    pub fn new(config: AudioConfig) -> Self {
        let capacity = config.ring_capacity();
        Self {
            config: Mutex::new(config),
            shared: Arc::new(CaptureShared {
                running: AtomicBool::new(false),
                ring: Mutex::new(SampleRing::new(capacity)),
                last_write: Mutex::new(None),
                started_at: Mutex::new(None),
                stream_error: Mutex::new(None),
            }),
            stream_thread: Mutex::new(None),
            consumer_thread: Mutex::new(None),
        }
    }

    /// Open the device and start streaming. Idempotent while running.
    pub fn start(&self) -> Result<(), AudioError> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let config = self.config.lock().clone();
        let device = device_by_index(config.device_index)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: match config.chunk_frames {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };

        let (chunk_tx, chunk_rx) = bounded::<Chunk>(CHUNK_CHANNEL_DEPTH);
        let (error_tx, error_rx) = bounded::<AudioError>(8);

        {
            let mut ring = self.shared.ring.lock();
            if ring.capacity() != config.ring_capacity() {
                *ring = SampleRing::new(config.ring_capacity());
            } else {
                ring.clear();
            }
        }
        *self.shared.last_write.lock() = None;
        *self.shared.stream_error.lock() = None;
        *self.shared.started_at.lock() = Some(Instant::now());
        self.shared.running.store(true, Ordering::SeqCst);

        tracing::info!(
            device = %device_name,
            sample_rate = config.sample_rate,
            channels = config.channels,
            "starting audio capture"
        );

        // Stream thread: owns the cpal stream (not Send) for its lifetime
        let shared = self.shared.clone();
        let stream_handle = thread::Builder::new()
            .name("audio-stream".to_string())
            .spawn(move || {
                let callback_tx = chunk_tx;
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Never block the device thread; a full channel
                        // drops the chunk and the consumer catches up
                        let _ = callback_tx.try_send(Chunk {
                            samples: data.to_vec(),
                            at: Instant::now(),
                        });
                    },
                    {
                        let error_tx = error_tx.clone();
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        }
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            *shared.stream_error.lock() =
                                Some(AudioError::StreamError(e.to_string()));
                            return;
                        }
                        while shared.running.load(Ordering::Relaxed) {
                            match error_rx.recv_timeout(Duration::from_millis(50)) {
                                Ok(err) => {
                                    tracing::error!(error = %err, "audio stream reported an error");
                                    *shared.stream_error.lock() = Some(err);
                                    break;
                                }
                                Err(RecvTimeoutError::Timeout) => {}
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        // Dropping the stream stops the device callback
                    }
                    Err(e) => {
                        *shared.stream_error.lock() = Some(classify_build_error(e, &stream_config));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        // Consumer thread: single writer into the sample ring
        let shared = self.shared.clone();
        let consumer_handle = thread::Builder::new()
            .name("audio-consumer".to_string())
            .spawn(move || {
                while shared.running.load(Ordering::Relaxed) {
                    match chunk_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(chunk) => {
                            shared.ring.lock().write(&chunk.samples);
                            *shared.last_write.lock() = Some(chunk.at);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        *self.stream_thread.lock() = Some(stream_handle);
        *self.consumer_thread.lock() = Some(consumer_handle);
        Ok(())
    }

    /// Stop streaming and release the device. Idempotent.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.consumer_thread.lock().take() {
            let _ = handle.join();
        }
        *self.shared.started_at.lock() = None;
        tracing::info!("audio capture stopped");
    }

    /// Stop and reopen the stream; used by the supervising loop when the
    /// device goes quiet mid-stream.
    pub fn restart(&self) -> Result<(), AudioError> {
        if !self.is_running() {
            return Err(AudioError::NotRunning);
        }
        tracing::warn!("restarting audio capture");
        self.stop();
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// A healthy stream is running and has produced samples recently.
    /// A freshly started stream gets a grace period of `stale_after`.
    pub fn is_healthy(&self, stale_after: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        if self.shared.stream_error.lock().is_some() {
            return false;
        }
        match *self.shared.last_write.lock() {
            Some(at) => at.elapsed() <= stale_after,
            None => self
                .shared
                .started_at
                .lock()
                .map(|at| at.elapsed() <= stale_after)
                .unwrap_or(false),
        }
    }

    /// The most recent `duration_ms` of audio.
    ///
    /// Always returns the requested length; before the ring has filled,
    /// the front of the segment is zero-filled rather than blocking.
    pub fn segment(&self, duration_ms: u64) -> AudioSegment {
        let config = self.config.lock();
        let per_channel = (config.sample_rate as u64 * duration_ms / 1000) as usize;
        let needed = per_channel * config.channels as usize;
        let samples = self.shared.ring.lock().read_last(needed);
        let captured_at = self.shared.last_write.lock().unwrap_or_else(Instant::now);

        AudioSegment {
            samples,
            sample_rate: config.sample_rate,
            channels: config.channels,
            captured_at,
        }
    }

    /// Current ring fill level in [0.0, 1.0]
    pub fn buffer_fill(&self) -> f32 {
        self.shared.ring.lock().fill_level()
    }

    /// Last stream error, if any
    pub fn last_error(&self) -> Option<String> {
        self.shared.stream_error.lock().as_ref().map(|e| e.to_string())
    }

    /// Select the device used by the next `start`/`restart`.
    /// Validates that the index resolves to a device.
    pub fn set_device(&self, index: Option<usize>) -> Result<(), AudioError> {
        device_by_index(index)?;
        self.config.lock().device_index = index;
        tracing::info!(?index, "audio device selected");
        Ok(())
    }

    /// How long the stream may go without producing samples before it
    /// is considered stalled
    pub fn stale_after(&self) -> Duration {
        self.config.lock().stale_after()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.lock().sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.config.lock().channels
    }

    #[cfg(test)]
    pub(crate) fn inject_samples(&self, samples: &[f32]) {
        self.shared.ring.lock().write(samples);
        *self.shared.last_write.lock() = Some(Instant::now());
    }
}

/// Map a cpal stream-build failure onto the audio error taxonomy,
/// keeping rejected formats distinct from everything else.
fn classify_build_error(err: cpal::BuildStreamError, config: &StreamConfig) -> AudioError {
    match err {
        cpal::BuildStreamError::StreamConfigNotSupported => AudioError::UnsupportedFormat(format!(
            "{}Hz / {} channel(s) f32",
            config.sample_rate.0, config.channels
        )),
        other => AudioError::StreamError(other.to_string()),
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_capture() -> AudioCapture {
        AudioCapture::new(AudioConfig {
            sample_rate: 16_000,
            channels: 1,
            ring_ms: 2_000,
            ..Default::default()
        })
    }

    #[test]
    fn segment_is_zero_filled_before_any_writes() {
        let capture = test_capture();
        let segment = capture.segment(500);
        assert_eq!(segment.samples.len(), 8_000);
        assert!(segment.samples.iter().all(|s| *s == 0.0));
        assert_eq!(segment.duration_ms(), 500);
    }

    #[test]
    fn segment_returns_most_recent_samples() {
        let capture = test_capture();
        capture.inject_samples(&[0.25; 16_000]);
        capture.inject_samples(&[0.75; 4_000]);

        let segment = capture.segment(250); // 4000 samples
        assert_eq!(segment.samples.len(), 4_000);
        assert!(segment.samples.iter().all(|s| *s == 0.75));
    }

    #[test]
    fn not_running_is_not_healthy() {
        let capture = test_capture();
        assert!(!capture.is_running());
        assert!(!capture.is_healthy(Duration::from_secs(2)));
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let capture = test_capture();
        capture.stop();
        assert!(!capture.is_running());
    }

    #[test]
    fn restart_without_start_reports_not_running() {
        let capture = test_capture();
        assert!(matches!(capture.restart(), Err(AudioError::NotRunning)));
    }

    #[test]
    fn rejected_stream_config_maps_to_unsupported_format() {
        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(16_000),
            buffer_size: cpal::BufferSize::Default,
        };
        assert!(matches!(
            classify_build_error(cpal::BuildStreamError::StreamConfigNotSupported, &config),
            AudioError::UnsupportedFormat(_)
        ));
        assert!(matches!(
            classify_build_error(cpal::BuildStreamError::DeviceNotAvailable, &config),
            AudioError::StreamError(_)
        ));
    }
}
