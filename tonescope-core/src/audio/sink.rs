//! Real-time capture callback contract.
//!
//! `CaptureSink::process` runs on the backend's audio thread. It touches only
//! the pre-allocated [`SampleFrame`] and never allocates, blocks or logs.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::buffering::{FrameSample, SampleFrame};

/// What the callback tells the backend after each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    /// More data is wanted.
    Continue,
    /// The frame (or the whole capture) is complete.
    Complete,
}

/// Appends incoming blocks to the current frame.
pub struct CaptureSink {
    frame: Arc<SampleFrame>,
}

impl CaptureSink {
    pub fn new(frame: Arc<SampleFrame>) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &SampleFrame {
        &self.frame
    }

    /// Copy up to `frames_per_buffer` frames from `input` into the frame at the
    /// cursor. `None` means the backend had no data: silence is written instead.
    ///
    /// Returns `Complete` on the call whose block reaches the end of the frame.
    pub fn process<S: FrameSample>(
        &mut self,
        input: Option<&[S]>,
        frames_per_buffer: usize,
    ) -> CallbackFlow {
        let frame = &*self.frame;
        let channels = frame.channels();
        let index = frame.write_index();
        let frames_remaining = frame.frame_count().saturating_sub(index);
        let frames_to_copy = frames_remaining.min(frames_per_buffer);

        let base = index * channels;
        let count = frames_to_copy * channels;
        match input {
            None => {
                for offset in 0..count {
                    frame.store(base + offset, 0.0);
                }
            }
            Some(block) => {
                let available = count.min(block.len());
                for (offset, sample) in block[..available].iter().enumerate() {
                    frame.store(base + offset, sample.to_frame_value());
                }
                // Short block: pad the rest of this call's span with silence.
                for offset in available..count {
                    frame.store(base + offset, 0.0);
                }
            }
        }
        frame.publish(index + frames_to_copy);

        if frames_remaining > frames_per_buffer {
            CallbackFlow::Continue
        } else {
            CallbackFlow::Complete
        }
    }
}

/// Counters shared between the capture callback and observers.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub blocks_in: AtomicUsize,
    pub frames_completed: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub frames_analyzed: AtomicUsize,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.blocks_in.store(0, Ordering::Relaxed);
        self.frames_completed.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.frames_analyzed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_in: self.blocks_in.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub blocks_in: usize,
    pub frames_completed: usize,
    pub frames_dropped: usize,
    pub frames_analyzed: usize,
}

/// Backend-side wrapper that turns per-frame completion into stream flow.
///
/// After a frame completes, incoming blocks are dropped until the driver has
/// rewound the cursor. Once `max_frames` frames have completed the session
/// answers `Complete` and the backend winds the stream down.
pub struct CaptureSession {
    sink: CaptureSink,
    max_frames: Option<u32>,
    completed: u32,
    awaiting_reset: bool,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl CaptureSession {
    pub fn new(
        sink: CaptureSink,
        max_frames: Option<u32>,
        diagnostics: Arc<CaptureDiagnostics>,
    ) -> Self {
        Self {
            sink,
            max_frames,
            completed: 0,
            awaiting_reset: false,
            diagnostics,
        }
    }

    pub fn channels(&self) -> usize {
        self.sink.frame().channels()
    }

    /// Frames completed so far in this session.
    pub fn completed_frames(&self) -> u32 {
        self.completed
    }

    /// `true` when no frame limit is set.
    pub fn is_unbounded(&self) -> bool {
        self.max_frames.is_none()
    }

    /// `true` while the current frame holds samples but has not completed.
    pub fn has_partial_frame(&self) -> bool {
        !self.awaiting_reset && self.sink.frame().write_index() > 0
    }

    /// `false` while a completed frame is still waiting for the driver.
    pub fn is_ready(&self) -> bool {
        !self.awaiting_reset || self.sink.frame().write_index() == 0
    }

    /// Feed one backend block. Real-time safe.
    pub fn on_block<S: FrameSample>(
        &mut self,
        input: Option<&[S]>,
        frames_per_buffer: usize,
    ) -> CallbackFlow {
        self.diagnostics.blocks_in.fetch_add(1, Ordering::Relaxed);

        if self.awaiting_reset {
            if self.sink.frame().write_index() != 0 {
                self.diagnostics
                    .frames_dropped
                    .fetch_add(frames_per_buffer, Ordering::Relaxed);
                return CallbackFlow::Continue;
            }
            self.awaiting_reset = false;
        }

        match self.sink.process(input, frames_per_buffer) {
            CallbackFlow::Continue => CallbackFlow::Continue,
            CallbackFlow::Complete => {
                self.completed = self.completed.saturating_add(1);
                self.awaiting_reset = true;
                self.diagnostics
                    .frames_completed
                    .fetch_add(1, Ordering::Relaxed);
                match self.max_frames {
                    Some(max) if self.completed >= max => CallbackFlow::Complete,
                    _ => CallbackFlow::Continue,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(frames: usize, channels: u16) -> CaptureSink {
        CaptureSink::new(Arc::new(SampleFrame::with_frames(frames, channels).unwrap()))
    }

    #[test]
    fn completes_exactly_once_on_the_reaching_call() {
        let mut sink = sink(10, 1);
        let block = [1i16; 4];

        assert_eq!(sink.process(Some(&block[..]), 4), CallbackFlow::Continue);
        assert_eq!(sink.frame().write_index(), 4);
        assert_eq!(sink.process(Some(&block[..]), 4), CallbackFlow::Continue);
        assert_eq!(sink.frame().write_index(), 8);
        // 2 frames left, 4 offered: only 2 copied and the frame completes.
        assert_eq!(sink.process(Some(&block[..]), 4), CallbackFlow::Complete);
        assert_eq!(sink.frame().write_index(), 10);
    }

    #[test]
    fn exact_fit_block_completes_on_that_call() {
        let mut sink = sink(8, 1);
        let block = [0.5f32; 4];
        assert_eq!(sink.process(Some(&block[..]), 4), CallbackFlow::Continue);
        assert_eq!(sink.process(Some(&block[..]), 4), CallbackFlow::Complete);
        assert!(sink.frame().is_complete());
    }

    #[test]
    fn completion_never_signalled_early_for_varied_block_sizes() {
        let sizes = [3usize, 7, 1, 5, 9, 2, 6];
        let capacity = 25usize;
        let mut sink = sink(capacity, 1);
        let mut cumulative = 0usize;
        let mut completions = 0;
        for &n in &sizes {
            let block = vec![0.1f64; n];
            let flow = sink.process(Some(&block), n);
            cumulative += n;
            if flow == CallbackFlow::Complete {
                completions += 1;
                assert!(cumulative >= capacity, "completed early at {cumulative}");
                break;
            }
            assert!(cumulative < capacity);
        }
        assert_eq!(completions, 1);
    }

    #[test]
    fn absent_input_writes_silence() {
        let mut sink = sink(6, 1);
        sink.process(Some(&[7i16, 7, 7, 7, 7, 7][..]), 6);
        sink.frame().reset_cursor();

        sink.process::<i16>(None, 4);
        let samples = sink.frame().to_vec();
        assert_eq!(&samples[..4], &[0.0; 4]);
        assert_eq!(&samples[4..], &[7.0, 7.0]);
    }

    #[test]
    fn stereo_silence_fills_every_channel() {
        let mut sink = sink(4, 2);
        sink.process(Some(&[1.0f32; 8][..]), 4);
        sink.frame().reset_cursor();

        sink.process::<f32>(None, 3);
        assert_eq!(sink.frame().write_index(), 3);
        let samples = sink.frame().to_vec();
        assert_eq!(&samples[..6], &[0.0; 6]);
        assert_eq!(&samples[6..], &[1.0, 1.0]);
    }

    #[test]
    fn short_block_is_padded_with_silence() {
        let mut sink = sink(4, 1);
        sink.process(Some(&[3i16, -3][..]), 4);
        assert_eq!(sink.frame().to_vec(), vec![3.0, -3.0, 0.0, 0.0]);
    }

    #[test]
    fn session_drops_blocks_until_cursor_reset() {
        let diagnostics = Arc::new(CaptureDiagnostics::default());
        let mut session = CaptureSession::new(sink(4, 1), None, Arc::clone(&diagnostics));

        assert_eq!(
            session.on_block(Some(&[1i16; 4][..]), 4),
            CallbackFlow::Continue
        );
        assert_eq!(session.completed_frames(), 1);

        // Driver has not consumed the frame yet: the block is discarded.
        assert_eq!(
            session.on_block(Some(&[2i16; 4][..]), 4),
            CallbackFlow::Continue
        );
        assert_eq!(session.sink.frame().to_vec(), vec![1.0; 4]);

        session.sink.frame().reset_cursor();
        session.on_block(Some(&[2i16; 4][..]), 4);
        assert_eq!(session.sink.frame().to_vec(), vec![2.0; 4]);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.blocks_in, 3);
        assert_eq!(snap.frames_completed, 2);
        assert_eq!(snap.frames_dropped, 4);
    }

    #[test]
    fn session_completes_after_max_frames() {
        let diagnostics = Arc::new(CaptureDiagnostics::default());
        let mut session = CaptureSession::new(sink(2, 1), Some(2), diagnostics);

        assert_eq!(session.on_block(Some(&[1.0f64, 1.0][..]), 2), CallbackFlow::Continue);
        session.sink.frame().reset_cursor();
        assert_eq!(session.on_block(Some(&[1.0f64][..]), 1), CallbackFlow::Continue);
        assert_eq!(session.on_block(Some(&[1.0f64][..]), 1), CallbackFlow::Complete);
        assert_eq!(session.completed_frames(), 2);
    }
}
