//! Lock-free single-frame sample buffer shared between the capture callback
//! and the polling driver.
//!
//! The capture context is the only writer of sample slots and of the cursor
//! while a frame is filling. The driver only touches the cursor once it has
//! observed a complete frame (resetting it to zero), at which point the
//! capture side is parked until it sees the reset.
//!
//! Samples are stored as `f64` bit patterns in `AtomicU64` slots with relaxed
//! ordering. The cursor is published with `Release` and read with `Acquire`,
//! so every sample written before a cursor advance is visible to a reader that
//! observed the advanced cursor.

pub mod sample;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Result, ToneError};

pub use sample::FrameSample;

/// Fixed-capacity interleaved sample buffer plus write cursor.
pub struct SampleFrame {
    samples: Box<[AtomicU64]>,
    /// Cursor in frames (one frame = `channels` samples).
    write_index: AtomicUsize,
    frame_count: usize,
    channels: usize,
}

impl SampleFrame {
    /// Allocate a frame holding `sample_rate × duration_secs × channels` samples.
    ///
    /// # Errors
    /// `ToneError::Config` for a zero-sized frame, `ToneError::Allocation` if the
    /// buffer cannot be reserved.
    pub fn new(sample_rate: u32, duration_secs: u32, channels: u16) -> Result<Self> {
        let frames = (sample_rate as usize)
            .checked_mul(duration_secs as usize)
            .ok_or_else(|| ToneError::Config("frame duration overflows".into()))?;
        Self::with_frames(frames, channels)
    }

    /// Allocate a frame of `frames` frames of `channels` interleaved samples.
    pub fn with_frames(frames: usize, channels: u16) -> Result<Self> {
        let channels = usize::from(channels);
        if frames == 0 || channels == 0 {
            return Err(ToneError::Config(format!(
                "frame must hold at least one sample (frames={frames}, channels={channels})"
            )));
        }
        let capacity = frames
            .checked_mul(channels)
            .ok_or_else(|| ToneError::Config("frame capacity overflows".into()))?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| ToneError::Allocation {
                what: "sample frame",
                len: capacity,
            })?;
        slots.extend((0..capacity).map(|_| AtomicU64::new(0f64.to_bits())));

        Ok(Self {
            samples: slots.into_boxed_slice(),
            write_index: AtomicUsize::new(0),
            frame_count: frames,
            channels,
        })
    }

    /// Total number of samples (frames × channels).
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of frames the buffer holds.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Cursor snapshot, in frames.
    pub fn write_index(&self) -> usize {
        self.write_index.load(Ordering::Acquire)
    }

    /// Frames left before the buffer is full.
    pub fn frames_remaining(&self) -> usize {
        self.frame_count.saturating_sub(self.write_index())
    }

    /// `true` once the cursor has reached the end of the buffer.
    pub fn is_complete(&self) -> bool {
        self.write_index() >= self.frame_count
    }

    /// Rewind the cursor so the next capture block overwrites from the start.
    /// Sample contents are left in place.
    pub fn reset_cursor(&self) {
        self.write_index.store(0, Ordering::Release);
    }

    /// Copy the buffer into `out` (up to `min(out.len(), capacity)` samples).
    ///
    /// Callers should take a cursor snapshot first; the copy reflects at least
    /// every sample published before that snapshot.
    pub fn copy_into(&self, out: &mut [f64]) {
        for (dst, slot) in out.iter_mut().zip(self.samples.iter()) {
            *dst = f64::from_bits(slot.load(Ordering::Relaxed));
        }
    }

    /// Owned copy of the whole buffer.
    pub fn to_vec(&self) -> Vec<f64> {
        // Acquire the latest published cursor before reading the slots.
        let _ = self.write_index();
        self.samples
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
            .collect()
    }

    pub(crate) fn store(&self, index: usize, value: f64) {
        self.samples[index].store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn publish(&self, write_index: usize) {
        debug_assert!(write_index <= self.frame_count);
        self.write_index.store(write_index, Ordering::Release);
    }
}

impl std::fmt::Debug for SampleFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleFrame")
            .field("capacity", &self.capacity())
            .field("channels", &self.channels)
            .field("write_index", &self.write_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_rate_times_duration_times_channels() {
        let frame = SampleFrame::new(8_000, 2, 2).unwrap();
        assert_eq!(frame.capacity(), 32_000);
        assert_eq!(frame.frame_count(), 16_000);
        assert_eq!(frame.channels(), 2);
        assert_eq!(frame.write_index(), 0);
        assert!(!frame.is_complete());
    }

    #[test]
    fn zero_sized_frame_is_rejected() {
        assert!(matches!(
            SampleFrame::new(0, 1, 1),
            Err(ToneError::Config(_))
        ));
        assert!(matches!(
            SampleFrame::with_frames(16, 0),
            Err(ToneError::Config(_))
        ));
    }

    #[test]
    fn reset_keeps_contents_and_rewinds_cursor() {
        let frame = SampleFrame::with_frames(4, 1).unwrap();
        for i in 0..4 {
            frame.store(i, i as f64 + 0.5);
        }
        frame.publish(4);
        assert!(frame.is_complete());
        assert_eq!(frame.frames_remaining(), 0);

        frame.reset_cursor();
        assert_eq!(frame.write_index(), 0);
        assert_eq!(frame.to_vec(), vec![0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn copy_into_truncates_to_shorter_side() {
        let frame = SampleFrame::with_frames(3, 1).unwrap();
        frame.store(0, 1.0);
        frame.store(1, -2.0);
        frame.store(2, 3.0);

        let mut short = [0.0; 2];
        frame.copy_into(&mut short);
        assert_eq!(short, [1.0, -2.0]);

        let mut long = [9.0; 5];
        frame.copy_into(&mut long);
        assert_eq!(long, [1.0, -2.0, 3.0, 9.0, 9.0]);
    }
}
