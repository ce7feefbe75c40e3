//! Replay backend: feeds pre-recorded samples through the capture path.
//!
//! Blocks of `frames_per_buffer` frames are delivered from a dedicated thread,
//! exactly like a device callback would. Once the source is exhausted the
//! thread keeps calling the session with absent input, which the sink turns
//! into silence. Without a frame limit it only does so to complete the last
//! partial frame, then the stream ends.
//!
//! In real-time mode blocks are paced at `frames_per_buffer / sample_rate`
//! and, like a live device, blocks that arrive while a completed frame is
//! still pending are dropped. Otherwise the thread waits for the driver to
//! consume each frame, so every source sample is analyzed.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{CallbackFlow, CaptureBackend, CaptureSession, CaptureStream, StreamParams, StreamStatus};
use crate::error::{BackendCode, Result, StreamOp, ToneError};

const DEFAULT_FRAMES_PER_BUFFER: usize = 1024;
const WAIT_FOR_DRIVER: Duration = Duration::from_millis(1);

/// Capture backend backed by an in-memory sample buffer.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    samples: Arc<[f64]>,
    realtime: bool,
}

impl ReplayBackend {
    /// Interleaved samples in frame scale.
    pub fn new(samples: Vec<f64>) -> Self {
        Self {
            samples: samples.into(),
            realtime: false,
        }
    }

    /// Pace delivery at the stream's sample rate.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl CaptureBackend for ReplayBackend {
    type Stream = ReplayStream;

    fn open(&mut self, params: &StreamParams, session: CaptureSession) -> Result<ReplayStream> {
        if params.sample_rate == 0 {
            return Err(ToneError::backend(
                StreamOp::Open,
                BackendCode::InvalidArgument,
                "sample rate must be positive",
            ));
        }
        let frames_per_buffer = params
            .frames_per_buffer
            .map(|f| f as usize)
            .filter(|&f| f > 0)
            .unwrap_or(DEFAULT_FRAMES_PER_BUFFER);
        let pace = self.realtime.then(|| {
            Duration::from_secs_f64(frames_per_buffer as f64 / f64::from(params.sample_rate))
        });

        debug!(
            source_samples = self.samples.len(),
            frames_per_buffer,
            realtime = self.realtime,
            "replay stream opened"
        );

        Ok(ReplayStream {
            pending: Some(ReplayJob {
                session,
                samples: Arc::clone(&self.samples),
                frames_per_buffer,
                pace,
            }),
            worker: None,
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(StreamStatus::default()),
        })
    }
}

struct ReplayJob {
    session: CaptureSession,
    samples: Arc<[f64]>,
    frames_per_buffer: usize,
    pace: Option<Duration>,
}

impl ReplayJob {
    fn run(mut self, stop: &AtomicBool, status: &StreamStatus) {
        let block_len = self.frames_per_buffer * self.session.channels();
        let mut pos = 0usize;

        while !stop.load(Ordering::Acquire) {
            if self.pace.is_none() && !self.session.is_ready() {
                thread::sleep(WAIT_FOR_DRIVER);
                continue;
            }

            let flow = if pos < self.samples.len() {
                let end = (pos + block_len).min(self.samples.len());
                let block = &self.samples[pos..end];
                pos = end;
                self.session.on_block(Some(block), self.frames_per_buffer)
            } else if self.session.is_unbounded() && !self.session.has_partial_frame() {
                debug!(
                    frames = self.session.completed_frames(),
                    "replay source exhausted"
                );
                break;
            } else {
                self.session.on_block::<f64>(None, self.frames_per_buffer)
            };

            if flow == CallbackFlow::Complete {
                break;
            }
            match self.pace {
                Some(interval) => thread::sleep(interval),
                None => thread::yield_now(),
            }
        }
        status.finish();
    }
}

/// Handle to a running replay thread.
pub struct ReplayStream {
    pending: Option<ReplayJob>,
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    status: Arc<StreamStatus>,
}

impl ReplayStream {
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("replay thread panicked");
                self.status
                    .fail(BackendCode::BackendSpecific, "replay thread panicked");
            }
        }
    }
}

impl CaptureStream for ReplayStream {
    fn start(&mut self) -> Result<()> {
        let Some(job) = self.pending.take() else {
            return Err(ToneError::backend(
                StreamOp::Start,
                BackendCode::InvalidArgument,
                "replay stream already started",
            ));
        };

        self.status.activate();
        let stop = Arc::clone(&self.stop);
        let status = Arc::clone(&self.status);
        let worker = thread::Builder::new()
            .name("tonescope-replay".into())
            .spawn(move || job.run(&stop, &status))
            .map_err(|e| {
                self.status.finish();
                ToneError::backend(StreamOp::Start, BackendCode::ThreadSpawn, e.to_string())
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        self.status.poll()
    }

    fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.join_worker();
        self.status.finish();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop()?;
        self.pending = None;
        Ok(())
    }
}

impl Drop for ReplayStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.join_worker();
    }
}
