//! Video frames and the bounded frame history

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Where a frame's pixels came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Fresh snapshot from the remote service
    Live,
    /// Last known-good frame served while the capture path is failing
    LastGood,
    /// Synthetic frame served when no snapshot has ever succeeded
    Placeholder,
}

/// One captured video frame, RGBA8.
///
/// Pixel data is shared (`Bytes`), so cloning a frame into a
/// synchronized sample does not copy the buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
    pub origin: FrameOrigin,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(source: impl Into<String>, width: u32, height: u32, pixels: Bytes) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            pixels,
            origin: FrameOrigin::Live,
            captured_at: Instant::now(),
        }
    }

    /// Mid-gray placeholder used when no snapshot has ever succeeded
    pub fn placeholder(source: impl Into<String>, width: u32, height: u32) -> Self {
        let pixels = vec![0x80u8; (width * height * 4) as usize];
        Self {
            source: source.into(),
            width,
            height,
            pixels: Bytes::from(pixels),
            origin: FrameOrigin::Placeholder,
            captured_at: Instant::now(),
        }
    }

    /// Re-serve this frame as a last-known-good fallback.
    /// The capture timestamp is kept so staleness checks still apply.
    pub fn as_last_good(&self) -> Self {
        let mut frame = self.clone();
        frame.origin = FrameOrigin::LastGood;
        frame
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Fixed-capacity frame history; insertion evicts the oldest entry.
///
/// Single writer (the capture loop); timestamps are monotonically
/// non-decreasing by construction.
pub struct FrameHistory {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame history capacity must be positive");
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn newest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Frames captured within the trailing `window`, oldest first
    pub fn recent(&self, window: Duration) -> Vec<Frame> {
        self.frames
            .iter()
            .filter(|f| f.age() <= window)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
