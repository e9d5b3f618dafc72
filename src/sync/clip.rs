//! Export of recent capture as on-disk artifacts
//!
//! A clip is a directory of numbered PNG frames plus a single WAV file,
//! both stamped with the wall-clock time of export. The two artifacts
//! fail independently; the outcome reports which of them made it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::AudioSegment;
use crate::error::{AudioError, CaptureError, Error, SyncError};
use crate::resilience::{ErrorBoundary, FailurePolicy};
use crate::sync::frame::Frame;

/// Result of a clip export. `success` means both artifacts were
/// written; one `Some` path with `success == false` is a partial export.
#[derive(Debug, Clone)]
pub struct ClipOutcome {
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub success: bool,
}

impl ClipOutcome {
    pub fn is_partial(&self) -> bool {
        !self.success && (self.video_path.is_some() || self.audio_path.is_some())
    }
}

/// Write `frames` and `audio` under `clip_dir`, named
/// `<prefix>-<timestamp>`. Failures are logged and reflected in the
/// outcome rather than propagated; the caller decides what partial
/// success means to it.
pub fn save_clip(clip_dir: &Path, prefix: &str, frames: &[Frame], audio: &AudioSegment) -> ClipOutcome {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let base = format!("{prefix}-{stamp}");

    // Each artifact fails on its own; a bad pixel buffer must not cost
    // the caller the audio track, and vice versa.
    let video_path = ErrorBoundary::new("clip-frames")
        .on_error(FailurePolicy::BestEffort)
        .run(|| write_frames(&clip_dir.join(format!("{base}-frames")), frames))
        .unwrap_or(None);

    let audio_path = ErrorBoundary::new("clip-audio")
        .on_error(FailurePolicy::BestEffort)
        .run(|| write_wav(&clip_dir.join(format!("{base}.wav")), audio))
        .unwrap_or(None);

    let success = video_path.is_some() && audio_path.is_some();
    tracing::info!(
        frames = frames.len(),
        audio_ms = audio.duration_ms(),
        success,
        "clip export finished"
    );

    ClipOutcome {
        video_path,
        audio_path,
        success,
    }
}

/// PNG sequence, oldest first, `frame-0000.png` onward
fn write_frames(dir: &Path, frames: &[Frame]) -> Result<PathBuf, Error> {
    if frames.is_empty() {
        return Err(SyncError::NoData.into());
    }
    fs::create_dir_all(dir)?;

    for (i, frame) in frames.iter().enumerate() {
        let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.pixels.to_vec())
            .ok_or_else(|| {
                CaptureError::DecodeFailed(format!(
                    "pixel buffer does not match {}x{}",
                    frame.width, frame.height
                ))
            })?;
        image
            .save(dir.join(format!("frame-{i:04}.png")))
            .map_err(|e| CaptureError::DecodeFailed(e.to_string()))?;
    }
    Ok(dir.to_path_buf())
}

fn write_wav(path: &Path, audio: &AudioSegment) -> Result<PathBuf, Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    for sample in &audio.samples {
        writer
            .write_sample(*sample)
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Instant;

    fn tmp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capture-sync-clip-{name}-{}", std::process::id()))
    }

    fn test_frame() -> Frame {
        Frame::new("camera", 2, 2, Bytes::from(vec![0xFFu8; 16]))
    }

    fn test_audio(samples: usize) -> AudioSegment {
        AudioSegment {
            samples: vec![0.5; samples],
            sample_rate: 16_000,
            channels: 1,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn exports_frames_and_wav() {
        let dir = tmp_dir("full");
        let outcome = save_clip(&dir, "clip", &[test_frame(), test_frame()], &test_audio(1_600));

        assert!(outcome.success);
        let video = outcome.video_path.unwrap();
        assert!(video.join("frame-0000.png").exists());
        assert!(video.join("frame-0001.png").exists());

        let reader = hound::WavReader::open(outcome.audio_path.unwrap()).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 1_600);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_frames_yield_a_partial_export() {
        let dir = tmp_dir("partial");
        let outcome = save_clip(&dir, "clip", &[], &test_audio(160));

        assert!(!outcome.success);
        assert!(outcome.is_partial());
        assert!(outcome.video_path.is_none());
        assert!(outcome.audio_path.unwrap().exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn bad_pixel_buffer_fails_video_only() {
        let dir = tmp_dir("badpixels");
        let mut frame = test_frame();
        frame.pixels = Bytes::from(vec![0u8; 3]); // wrong length for 2x2 RGBA
        let outcome = save_clip(&dir, "clip", &[frame], &test_audio(160));

        assert!(!outcome.success);
        assert!(outcome.video_path.is_none());
        assert!(outcome.audio_path.is_some());

        let _ = fs::remove_dir_all(dir);
    }
}
