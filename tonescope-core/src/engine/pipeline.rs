//! Blocking pipeline driver.
//!
//! ## States
//!
//! ```text
//! Idle ─initialize─► Initialized ─run─► Capturing ─stream inactive─► Draining ─► Stopped
//!   └──────────────────────┴──────────────────┴──────────────────────────┴──► Failed
//! ```
//!
//! ## Poll tick (while Capturing)
//!
//! ```text
//! 1. Cancel requested?  → stop the stream (once)
//! 2. Poll stream-active status (backend errors are fatal)
//! 3. Cursor at end of frame?
//!    a. snapshot frame → plan input
//!    b. rewind cursor (capture resumes into the next frame)
//!    c. execute transform, compute dB spectrum, report peak
//! 4. Stream inactive → leave the loop
//! 5. Sleep one poll interval
//! ```
//!
//! The loop never waits on a frame-ready signal: it re-checks the cursor on
//! every tick. This runs on a plain blocking thread; nothing here is
//! real-time constrained.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::{
    audio::{CaptureBackend, CaptureDiagnostics, CaptureSession, CaptureSink, CaptureStream},
    buffering::SampleFrame,
    dump,
    engine::EngineConfig,
    error::{BackendCode, Result, StreamOp, ToneError},
    report::{CaptureStats, PipelineState, ReportSink},
    spectrum::{usable_bin_count, SpectrumEngine, SpectrumPostProcessor, TransformPlan},
};

/// All context the pipeline needs, passed as one struct so call sites stay tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub sink: Box<dyn ReportSink + Send>,
    /// Set to request a cooperative stop.
    pub cancel: Arc<AtomicBool>,
    pub diagnostics: Arc<CaptureDiagnostics>,
}

/// Result of a completed capture.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub stats: CaptureStats,
    pub frames_analyzed: usize,
    /// Final contents of the frame buffer.
    pub samples: Vec<f64>,
}

/// Owns the frame, the transform plan and the stream for one capture run.
pub struct PipelineDriver<S: CaptureStream> {
    // Declared first so an implicit drop releases the stream before the plan.
    stream: Option<S>,
    frame: Arc<SampleFrame>,
    plan: TransformPlan,
    engine: SpectrumEngine,
    post: SpectrumPostProcessor,
    config: EngineConfig,
    sink: Box<dyn ReportSink + Send>,
    cancel: Arc<AtomicBool>,
    diagnostics: Arc<CaptureDiagnostics>,
    state: PipelineState,
    frames_analyzed: usize,
}

impl<S: CaptureStream> PipelineDriver<S> {
    /// Idle → Initialized: allocate the frame and plan, open the stream.
    ///
    /// On failure the sink sees `Failed` and everything acquired so far is
    /// released.
    pub fn initialize<B>(ctx: PipelineContext, backend: &mut B) -> Result<Self>
    where
        B: CaptureBackend<Stream = S>,
    {
        let PipelineContext {
            config,
            mut sink,
            cancel,
            diagnostics,
        } = ctx;

        match Self::allocate(&config, backend, &diagnostics) {
            Ok((frame, plan, stream)) => {
                let post = SpectrumPostProcessor::new(config.sample_rate, plan.size())
                    .with_mode(config.magnitude_mode);
                info!(
                    sample_rate = config.sample_rate,
                    channels = config.channels,
                    frame_capacity = frame.capacity(),
                    bins = post.bin_count(),
                    max_frames = ?config.max_frames,
                    "pipeline initialized"
                );
                sink.state_changed(PipelineState::Initialized, None);
                Ok(Self {
                    stream: Some(stream),
                    frame,
                    plan,
                    engine: SpectrumEngine::new(),
                    post,
                    config,
                    sink,
                    cancel,
                    diagnostics,
                    state: PipelineState::Initialized,
                    frames_analyzed: 0,
                })
            }
            Err(e) => {
                error!(error = %e, "pipeline setup failed");
                sink.state_changed(PipelineState::Failed, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    fn allocate<B>(
        config: &EngineConfig,
        backend: &mut B,
        diagnostics: &Arc<CaptureDiagnostics>,
    ) -> Result<(Arc<SampleFrame>, TransformPlan, S)>
    where
        B: CaptureBackend<Stream = S>,
    {
        config.validate()?;

        let frame = Arc::new(SampleFrame::new(
            config.sample_rate,
            config.frame_seconds,
            config.channels,
        )?);
        if usable_bin_count(frame.capacity()) == 0 {
            return Err(ToneError::TransformPlan(format!(
                "frame of {} samples leaves no usable bins",
                frame.capacity()
            )));
        }
        let plan = TransformPlan::new(frame.capacity())?;

        diagnostics.reset();
        let session = CaptureSession::new(
            CaptureSink::new(Arc::clone(&frame)),
            config.max_frames,
            Arc::clone(diagnostics),
        );
        let stream = backend.open(&config.stream_params(), session)?;
        Ok((frame, plan, stream))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Initialized → Capturing → Draining → Stopped.
    ///
    /// Blocks until the stream stops (target frame count reached, cancel
    /// requested, or the backend failed). Any backend error is fatal.
    pub fn run(mut self) -> Result<CaptureOutcome> {
        if let Err(e) = self.capture() {
            return Err(self.fail(e));
        }
        match self.drain() {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn capture(&mut self) -> Result<()> {
        self.stream_mut(StreamOp::Start)?.start()?;
        self.transition(PipelineState::Capturing, None);
        info!("capture started");

        let mut stop_requested = false;
        loop {
            if !stop_requested && self.cancel.load(Ordering::Acquire) {
                stop_requested = true;
                info!("stop requested, stopping input stream");
                self.stream_mut(StreamOp::Stop)?.stop()?;
            }

            let active = self.stream_mut(StreamOp::Poll)?.is_active()?;

            if self.frame.is_complete() {
                self.analyze_frame()?;
            }

            if !active {
                break;
            }
            thread::sleep(self.config.poll_interval);
        }

        self.transition(PipelineState::Draining, None);
        Ok(())
    }

    fn analyze_frame(&mut self) -> Result<()> {
        let started = Instant::now();

        self.plan.load_frame(&self.frame);
        self.frame.reset_cursor();
        self.engine.execute(&mut self.plan)?;
        let bins = self.post.compute(self.plan.output());

        let frame_no = self.frames_analyzed;
        self.frames_analyzed += 1;
        self.diagnostics
            .frames_analyzed
            .fetch_add(1, Ordering::Relaxed);

        debug!(
            frame = frame_no,
            elapsed_us = started.elapsed().as_micros() as u64,
            "frame analyzed"
        );

        match bins.peak() {
            Some(report) => {
                debug!(
                    frame = frame_no,
                    bin = report.bin_index,
                    frequency_hz = bins.frequency_of(report.bin_index),
                    value_db = report.value_db,
                    velocity = report.velocity,
                    "peak bin"
                );
                self.sink.peak(frame_no, &report, &bins);
            }
            None => warn!(frame = frame_no, "frame produced an empty spectrum"),
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<CaptureOutcome> {
        if let Some(mut stream) = self.stream.take() {
            stream.close()?;
        }

        let samples = self.frame.to_vec();
        let stats = CaptureStats::from_samples(&samples);
        debug!(
            peak_amplitude = stats.peak_amplitude,
            average_amplitude = stats.average_amplitude,
            frames_analyzed = self.frames_analyzed,
            "capture statistics"
        );

        if let Some(path) = self.config.raw_output.as_deref() {
            match dump::write_file(path, &samples, self.config.raw_format) {
                Ok(()) => info!(path = %path.display(), "wrote raw samples"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not write raw samples"),
            }
        }

        self.sink.stats(&stats);
        self.transition(PipelineState::Stopped, None);

        let snapshot = self.diagnostics.snapshot();
        debug!(
            blocks_in = snapshot.blocks_in,
            frames_completed = snapshot.frames_completed,
            frames_dropped = snapshot.frames_dropped,
            "capture diagnostics"
        );

        Ok(CaptureOutcome {
            stats,
            frames_analyzed: self.frames_analyzed,
            samples,
        })
    }

    /// Best-effort teardown after a fatal error.
    fn fail(&mut self, e: ToneError) -> ToneError {
        error!(state = ?self.state, error = %e, "pipeline failed");
        if let Some(mut stream) = self.stream.take() {
            if let Err(close_err) = stream.close() {
                warn!(error = %close_err, "could not close stream after failure");
            }
        }
        self.transition(PipelineState::Failed, Some(e.to_string()));
        e
    }

    fn transition(&mut self, next: PipelineState, detail: Option<String>) {
        debug!(from = ?self.state, to = ?next, "pipeline state change");
        self.state = next;
        self.sink.state_changed(next, detail.as_deref());
    }

    fn stream_mut(&mut self, op: StreamOp) -> Result<&mut S> {
        self.stream.as_mut().ok_or_else(|| {
            ToneError::backend(op, BackendCode::InvalidArgument, "stream already closed")
        })
    }
}

impl<S: CaptureStream> Drop for PipelineDriver<S> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::audio::{ReplayBackend, StreamParams};
    use crate::spectrum::{PeakReport, SpectrumBins};

    #[derive(Default)]
    struct Recorded {
        states: Vec<PipelineState>,
        peaks: Vec<PeakReport>,
        stats: Vec<CaptureStats>,
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Recorded>>);

    impl ReportSink for RecordingSink {
        fn state_changed(&mut self, state: PipelineState, _detail: Option<&str>) {
            self.0.lock().states.push(state);
        }

        fn peak(&mut self, _frame: usize, report: &PeakReport, _bins: &SpectrumBins) {
            self.0.lock().peaks.push(*report);
        }

        fn stats(&mut self, stats: &CaptureStats) {
            self.0.lock().stats.push(*stats);
        }
    }

    /// Stream that delivers nothing and fails on a chosen operation.
    ///
    /// When failing on `Close` the stream reports itself inactive at once, so
    /// the driver heads straight for draining.
    struct FaultyStream {
        fail_on: StreamOp,
        polls_before_failure: usize,
        polls: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    impl CaptureStream for FaultyStream {
        fn start(&mut self) -> Result<()> {
            if self.fail_on == StreamOp::Start {
                return Err(ToneError::backend(
                    StreamOp::Start,
                    BackendCode::DeviceNotAvailable,
                    "gone",
                ));
            }
            Ok(())
        }

        fn is_active(&self) -> Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::Relaxed);
            if self.fail_on == StreamOp::Poll && n >= self.polls_before_failure {
                return Err(ToneError::backend(
                    StreamOp::Poll,
                    BackendCode::BackendSpecific,
                    "driver crashed",
                ));
            }
            Ok(self.fail_on != StreamOp::Close)
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            if self.fail_on == StreamOp::Close {
                return Err(ToneError::backend(
                    StreamOp::Close,
                    BackendCode::BackendSpecific,
                    "close broke",
                ));
            }
            Ok(())
        }
    }

    struct FaultyBackend {
        fail_on: StreamOp,
        closes: Arc<AtomicUsize>,
    }

    impl CaptureBackend for FaultyBackend {
        type Stream = FaultyStream;

        fn open(&mut self, _params: &StreamParams, _session: CaptureSession) -> Result<FaultyStream> {
            if self.fail_on == StreamOp::Open {
                return Err(ToneError::backend(
                    StreamOp::Open,
                    BackendCode::ConfigNotSupported,
                    "17932 Hz not supported",
                ));
            }
            Ok(FaultyStream {
                fail_on: self.fail_on,
                polls_before_failure: 2,
                polls: AtomicUsize::new(0),
                closes: Arc::clone(&self.closes),
            })
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            sample_rate: 64,
            frame_seconds: 1,
            frames_per_buffer: Some(16),
            poll_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    fn context(config: EngineConfig, sink: &RecordingSink) -> PipelineContext {
        PipelineContext {
            config,
            sink: Box::new(sink.clone()),
            cancel: Arc::new(AtomicBool::new(false)),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    #[test]
    fn single_frame_run_walks_every_state() {
        let sink = RecordingSink::default();
        let samples: Vec<f64> = (0..64).map(|i| if i % 2 == 0 { 3.0 } else { -1.0 }).collect();
        let mut backend = ReplayBackend::new(samples);

        let driver = PipelineDriver::initialize(context(small_config(), &sink), &mut backend).unwrap();
        assert_eq!(driver.state(), PipelineState::Initialized);
        let outcome = driver.run().unwrap();

        let recorded = sink.0.lock();
        assert_eq!(
            recorded.states,
            vec![
                PipelineState::Initialized,
                PipelineState::Capturing,
                PipelineState::Draining,
                PipelineState::Stopped,
            ]
        );
        assert_eq!(recorded.peaks.len(), 1);
        assert_eq!(outcome.frames_analyzed, 1);
        assert_eq!(outcome.stats.peak_amplitude, 3.0);
        assert_eq!(outcome.stats.average_amplitude, 2.0);
        assert_eq!(recorded.stats, vec![outcome.stats]);
    }

    #[test]
    fn multiple_frames_are_each_analyzed() {
        let sink = RecordingSink::default();
        let config = EngineConfig {
            max_frames: Some(3),
            ..small_config()
        };
        let mut backend = ReplayBackend::new(vec![1.0; 64 * 3]);
        let driver = PipelineDriver::initialize(context(config, &sink), &mut backend).unwrap();
        let outcome = driver.run().unwrap();

        assert_eq!(outcome.frames_analyzed, 3);
        assert_eq!(sink.0.lock().peaks.len(), 3);
    }

    #[test]
    fn open_failure_reports_failed_state() {
        let sink = RecordingSink::default();
        let mut backend = FaultyBackend {
            fail_on: StreamOp::Open,
            closes: Arc::new(AtomicUsize::new(0)),
        };
        let err = PipelineDriver::initialize(context(small_config(), &sink), &mut backend)
            .err()
            .expect("open should fail");
        assert_eq!(err.code(), Some(BackendCode::ConfigNotSupported.as_i32()));
        assert_eq!(sink.0.lock().states, vec![PipelineState::Failed]);
    }

    #[test]
    fn undersized_frame_is_a_setup_error() {
        let sink = RecordingSink::default();
        let config = EngineConfig {
            sample_rate: 3,
            ..small_config()
        };
        let mut backend = ReplayBackend::new(Vec::new());
        let err = PipelineDriver::initialize(context(config, &sink), &mut backend)
            .err()
            .expect("plan should fail");
        assert!(matches!(err, ToneError::TransformPlan(_)));
    }

    #[test]
    fn start_failure_closes_stream_once() {
        let sink = RecordingSink::default();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut backend = FaultyBackend {
            fail_on: StreamOp::Start,
            closes: Arc::clone(&closes),
        };
        let driver = PipelineDriver::initialize(context(small_config(), &sink), &mut backend).unwrap();
        let err = driver.run().unwrap_err();

        assert_eq!(err.code(), Some(BackendCode::DeviceNotAvailable.as_i32()));
        assert_eq!(closes.load(Ordering::Relaxed), 1);
        assert_eq!(
            sink.0.lock().states,
            vec![PipelineState::Initialized, PipelineState::Failed]
        );
    }

    #[test]
    fn poll_failure_during_capture_is_fatal() {
        let sink = RecordingSink::default();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut backend = FaultyBackend {
            fail_on: StreamOp::Poll,
            closes: Arc::clone(&closes),
        };
        let driver = PipelineDriver::initialize(context(small_config(), &sink), &mut backend).unwrap();
        let err = driver.run().unwrap_err();

        assert!(err.to_string().contains("driver crashed"));
        assert_eq!(closes.load(Ordering::Relaxed), 1);
        let recorded = sink.0.lock();
        assert_eq!(recorded.states.last(), Some(&PipelineState::Failed));
        assert!(recorded.stats.is_empty());
    }

    #[test]
    fn close_failure_while_draining_is_fatal() {
        let sink = RecordingSink::default();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut backend = FaultyBackend {
            fail_on: StreamOp::Close,
            closes: Arc::clone(&closes),
        };
        let driver = PipelineDriver::initialize(context(small_config(), &sink), &mut backend).unwrap();
        let err = driver.run().unwrap_err();

        assert_eq!(err.code(), Some(BackendCode::BackendSpecific.as_i32()));
        assert!(err.to_string().contains("closing the input stream"));
        assert_eq!(closes.load(Ordering::Relaxed), 1);
        let recorded = sink.0.lock();
        assert_eq!(
            recorded.states,
            vec![
                PipelineState::Initialized,
                PipelineState::Capturing,
                PipelineState::Draining,
                PipelineState::Failed,
            ]
        );
        assert!(recorded.stats.is_empty());
    }

    #[test]
    fn cancel_stops_an_unbounded_capture() {
        let sink = RecordingSink::default();
        let config = EngineConfig {
            max_frames: None,
            ..small_config()
        };
        let ctx = context(config, &sink);
        let cancel = Arc::clone(&ctx.cancel);
        let mut backend = ReplayBackend::new(vec![0.5; 64]).realtime(true);
        let driver = PipelineDriver::initialize(ctx, &mut backend).unwrap();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.store(true, Ordering::Release);
        });
        let outcome = driver.run().unwrap();
        canceller.join().unwrap();

        assert_eq!(
            sink.0.lock().states.last(),
            Some(&PipelineState::Stopped)
        );
        assert_eq!(outcome.samples.len(), 64);
    }

    #[test]
    fn raw_dump_is_written_on_drain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorded.raw");
        let sink = RecordingSink::default();
        let config = EngineConfig {
            raw_output: Some(path.clone()),
            raw_format: dump::RawSampleFormat::I16,
            ..small_config()
        };
        let samples: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let mut backend = ReplayBackend::new(samples.clone());
        PipelineDriver::initialize(context(config, &sink), &mut backend)
            .unwrap()
            .run()
            .unwrap();

        let written = dump::read_file(&path, dump::RawSampleFormat::I16).unwrap();
        assert_eq!(written, samples);
    }

    #[test]
    fn unwritable_raw_dump_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let config = EngineConfig {
            raw_output: Some(dir.path().join("missing").join("recorded.raw")),
            ..small_config()
        };
        let mut backend = ReplayBackend::new(vec![1.0; 64]);
        let outcome = PipelineDriver::initialize(context(config, &sink), &mut backend)
            .unwrap()
            .run();
        assert!(outcome.is_ok());
    }
}
