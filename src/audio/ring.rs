//! Fixed-capacity circular sample buffer
//!
//! Single-writer buffer of interleaved f32 samples. Writes wrap at the
//! capacity without reallocating; reads copy the most recent N samples,
//! stitching the wrapped tail and head back together when the read
//! straddles the buffer boundary.

/// Circular f32 sample buffer
pub struct SampleRing {
    buffer: Vec<f32>,
    /// Next write position
    cursor: usize,
    /// Total samples ever written; capped reads use min(total, capacity)
    total_written: u64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            buffer: vec![0.0; capacity],
            cursor: 0,
            total_written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Samples currently available for reading
    pub fn len(&self) -> usize {
        self.total_written.min(self.buffer.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Fill level in [0.0, 1.0]
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }

    /// Append samples at the write cursor, wrapping as needed.
    ///
    /// A chunk larger than the whole ring keeps only its trailing
    /// `capacity` samples, which is what the wrap semantics degenerate to.
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        let effective = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let first = (capacity - self.cursor).min(effective.len());
        self.buffer[self.cursor..self.cursor + first].copy_from_slice(&effective[..first]);
        let rest = effective.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&effective[first..]);
        }

        self.cursor = (self.cursor + effective.len()) % capacity;
        self.total_written += samples.len() as u64;
    }

    /// Copy of the most recent `count` samples, oldest first.
    ///
    /// When fewer than `count` samples have ever been written, the front
    /// is zero-filled so the caller always gets the requested length.
    pub fn read_last(&self, count: usize) -> Vec<f32> {
        let capacity = self.buffer.len();
        let count = count.min(capacity);
        let available = self.len().min(count);

        let mut out = vec![0.0f32; count];
        let pad = count - available;

        // Read `available` samples ending at the cursor
        let start = (self.cursor + capacity - available) % capacity;
        let first = (capacity - start).min(available);
        out[pad..pad + first].copy_from_slice(&self.buffer[start..start + first]);
        let rest = available - first;
        if rest > 0 {
            out[pad + first..].copy_from_slice(&self.buffer[..rest]);
        }

        out
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.cursor = 0;
        self.total_written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn read_before_fill_is_zero_padded() {
        let mut ring = SampleRing::new(8);
        ring.write(&[1.0, 2.0, 3.0]);

        let out = ring.read_last(5);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn wrap_read_is_continuous() {
        // 2s ring at 16kHz; write 3s of a ramp, read back 500ms
        let capacity = 32_000;
        let mut ring = SampleRing::new(capacity);

        let total = 48_000;
        let chunk = 1_000;
        let mut written = Vec::with_capacity(total);
        for base in (0..total).step_by(chunk) {
            let samples: Vec<f32> = (base..base + chunk).map(|i| i as f32).collect();
            ring.write(&samples);
            written.extend_from_slice(&samples);
        }

        let out = ring.read_last(8_000);
        assert_eq!(out.len(), 8_000);
        // Most recent 8000 samples, no discontinuity across the wrap
        assert_eq!(out[0], (total - 8_000) as f32);
        for pair in out.windows(2) {
            assert_eq!(pair[1] - pair[0], 1.0);
        }
    }

    #[test]
    fn capacity_never_grows() {
        let mut ring = SampleRing::new(64);
        for _ in 0..100 {
            ring.write(&[0.5; 48]);
        }
        assert_eq!(ring.capacity(), 64);
        assert_eq!(ring.len(), 64);
        assert_eq!(ring.total_written(), 4_800);
    }

    #[test]
    fn oversized_chunk_keeps_trailing_samples() {
        let mut ring = SampleRing::new(4);
        let chunk: Vec<f32> = (0..10).map(|i| i as f32).collect();
        ring.write(&chunk);
        assert_eq!(ring.read_last(4), vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn clear_resets_contents_and_counters() {
        let mut ring = SampleRing::new(8);
        ring.write(&[1.0; 8]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.read_last(4), vec![0.0; 4]);
    }

    proptest! {
        #[test]
        fn read_matches_trailing_slice_of_writes(
            chunks in prop::collection::vec(
                prop::collection::vec(-1.0f32..1.0, 1..64),
                1..32,
            ),
            capacity in 16usize..128,
            read_len in 1usize..64,
        ) {
            let mut ring = SampleRing::new(capacity);
            let mut all: Vec<f32> = Vec::new();
            for chunk in &chunks {
                ring.write(chunk);
                all.extend_from_slice(chunk);
            }

            let read_len = read_len.min(capacity);
            let out = ring.read_last(read_len);
            prop_assert_eq!(out.len(), read_len);

            let available = all.len().min(read_len).min(capacity);
            let expected = &all[all.len() - available..];
            prop_assert_eq!(&out[read_len - available..], expected);
            // Anything before the available window is zero padding
            prop_assert!(out[..read_len - available].iter().all(|s| *s == 0.0));
        }
    }
}
