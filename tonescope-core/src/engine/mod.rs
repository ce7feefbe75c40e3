//! `ToneEngine`, the top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! ToneEngine::new()
//!     └─► start(source)   → stream open confirmed, driver running, status = Capturing
//!         └─► stop()      → cancel flag set, driver drains, status = Stopped
//! ```
//!
//! `start()`/`stop()` return an error when called in the wrong state rather
//! than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! The backend therefore opens its stream *inside* the `spawn_blocking`
//! closure so it never crosses a thread boundary. A sync oneshot channel
//! propagates open errors back to the `start()` caller.

pub mod pipeline;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::info;

use crate::{
    audio::{CaptureBackend, CaptureDiagnostics, DiagnosticsSnapshot, ReplayBackend, StreamParams},
    dump::RawSampleFormat,
    error::{Result, ToneError},
    report::{BroadcastSink, CaptureStats, LogSink, PipelineState, ReportSink, ToneEvent},
    spectrum::{MagnitudeMode, PeakReport, SpectrumBins},
};

pub use pipeline::{CaptureOutcome, PipelineContext, PipelineDriver};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for one capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Capture sample rate (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Length of one analysis frame in seconds. Default: 1.
    pub frame_seconds: u32,
    /// Interleaved channel count, 1 or 2. Default: 1.
    pub channels: u16,
    /// Block size requested from the backend. `None` lets it choose.
    pub frames_per_buffer: Option<u32>,
    /// Stop after this many complete frames. `None` runs until stopped.
    pub max_frames: Option<u32>,
    /// Sleep between driver polls. Default: 10 ms.
    pub poll_interval: Duration,
    pub magnitude_mode: MagnitudeMode,
    /// Write the final frame here after capture.
    pub raw_output: Option<PathBuf>,
    pub raw_format: RawSampleFormat,
    /// Input device name. `None` falls back to the default input device.
    pub preferred_input_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_seconds: 1,
            channels: 1,
            frames_per_buffer: Some(1_024),
            max_frames: Some(1),
            poll_interval: Duration::from_millis(10),
            magnitude_mode: MagnitudeMode::default(),
            raw_output: None,
            raw_format: RawSampleFormat::default(),
            preferred_input_device: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ToneError::Config("sample rate must be positive".into()));
        }
        if self.frame_seconds == 0 {
            return Err(ToneError::Config("frame length must be at least one second".into()));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ToneError::Config(format!(
                "unsupported channel count {} (expected 1 or 2)",
                self.channels
            )));
        }
        if self.max_frames == Some(0) {
            return Err(ToneError::Config("max frames must be positive".into()));
        }
        Ok(())
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames_per_buffer: self.frames_per_buffer,
            device: self.preferred_input_device.clone(),
        }
    }
}

/// Where capture data comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// Live input through cpal; uses `EngineConfig::preferred_input_device`.
    Device,
    /// Pre-recorded samples fed through the same capture path.
    Replay(ReplayBackend),
}

/// The top-level engine handle.
///
/// `ToneEngine` is `Send + Sync`; all fields use interior mutability. Wrap in
/// `Arc<ToneEngine>` to share it with signal handlers and event-forwarding
/// tasks.
pub struct ToneEngine {
    config: EngineConfig,
    /// `true` while a driver thread owns the stream.
    running: Arc<AtomicBool>,
    /// Set by `stop()`, read by the driver's poll loop.
    cancel: Arc<AtomicBool>,
    /// Last state reported by the driver.
    status: Arc<Mutex<PipelineState>>,
    event_tx: broadcast::Sender<ToneEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl ToneEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(PipelineState::Idle)),
            event_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    /// Open the input and start the pipeline on a blocking thread.
    ///
    /// Blocks until the stream is confirmed open (or fails). The returned
    /// handle resolves once the capture has drained. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    /// - `ToneError::AlreadyRunning` if a capture is in progress.
    /// - Any setup or backend error raised while opening the stream.
    pub fn start(&self, source: InputSource) -> Result<JoinHandle<Result<CaptureOutcome>>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ToneError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let ctx = PipelineContext {
            config: self.config.clone(),
            sink: Box::new(EngineSink {
                log: LogSink,
                events: BroadcastSink::new(self.event_tx.clone(), Arc::clone(&self.seq)),
                status: Arc::clone(&self.status),
            }),
            cancel: Arc::clone(&self.cancel),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let running = Arc::clone(&self.running);

        // Sync oneshot: the driver thread signals open success/failure to start().
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        let handle = tokio::task::spawn_blocking(move || {
            let outcome = match source {
                InputSource::Replay(mut backend) => drive(ctx, &mut backend, &open_tx),
                InputSource::Device => open_device(ctx, &open_tx),
            };
            running.store(false, Ordering::SeqCst);
            outcome
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("engine started, capturing");
                Ok(handle)
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: the task panicked.
                self.running.store(false, Ordering::SeqCst);
                *self.status.lock() = PipelineState::Failed;
                Err(ToneError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Request a cooperative stop. The driver stops the stream, drains and
    /// reports final statistics.
    ///
    /// # Errors
    /// - `ToneError::NotRunning` if no capture is in progress.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ToneError::NotRunning);
        }
        self.cancel.store(true, Ordering::Release);
        info!("engine stop requested");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current pipeline state (snapshot).
    pub fn status(&self) -> PipelineState {
        *self.status.lock()
    }

    /// Subscribe to live state, peak and statistics events.
    pub fn subscribe(&self) -> broadcast::Receiver<ToneEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of capture counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

/// Initialize and run a driver, reporting the open result through `open_tx`.
fn drive<B: CaptureBackend>(
    ctx: PipelineContext,
    backend: &mut B,
    open_tx: &std::sync::mpsc::Sender<Result<()>>,
) -> Result<CaptureOutcome> {
    match PipelineDriver::initialize(ctx, backend) {
        Ok(driver) => {
            let _ = open_tx.send(Ok(()));
            driver.run()
        }
        Err(e) => {
            let message = e.to_string();
            let _ = open_tx.send(Err(e));
            Err(ToneError::Other(anyhow::anyhow!(
                "pipeline failed to initialize: {message}"
            )))
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn open_device(
    ctx: PipelineContext,
    open_tx: &std::sync::mpsc::Sender<Result<()>>,
) -> Result<CaptureOutcome> {
    // Opened on this thread: the cpal stream must be dropped here too.
    drive(ctx, &mut crate::audio::CpalBackend::new(), open_tx)
}

#[cfg(not(feature = "audio-cpal"))]
fn open_device(
    mut ctx: PipelineContext,
    open_tx: &std::sync::mpsc::Sender<Result<()>>,
) -> Result<CaptureOutcome> {
    let message = "built without the audio-cpal feature; only replay input is available";
    ctx.sink
        .state_changed(PipelineState::Failed, Some(message));
    let _ = open_tx.send(Err(ToneError::Config(message.into())));
    Err(ToneError::Config(message.into()))
}

/// Logs and broadcasts events, and mirrors the pipeline state into the
/// engine status.
struct EngineSink {
    log: LogSink,
    events: BroadcastSink,
    status: Arc<Mutex<PipelineState>>,
}

impl ReportSink for EngineSink {
    fn state_changed(&mut self, state: PipelineState, detail: Option<&str>) {
        *self.status.lock() = state;
        self.log.state_changed(state, detail);
        self.events.state_changed(state, detail);
    }

    fn peak(&mut self, frame: usize, report: &PeakReport, bins: &SpectrumBins) {
        self.log.peak(frame, report, bins);
        self.events.peak(frame, report, bins);
    }

    fn stats(&mut self, stats: &CaptureStats) {
        self.log.stats(stats);
        self.events.stats(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::EventKind;

    fn replay_config() -> EngineConfig {
        EngineConfig {
            sample_rate: 256,
            frames_per_buffer: Some(64),
            poll_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn defaults_match_classic_setup() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.frame_seconds, 1);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frames_per_buffer, Some(1_024));
        assert_eq!(config.max_frames, Some(1));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let three_channels = EngineConfig {
            channels: 3,
            ..EngineConfig::default()
        };
        assert!(matches!(three_channels.validate(), Err(ToneError::Config(_))));

        let no_rate = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(no_rate.validate().is_err());

        let no_frames = EngineConfig {
            max_frames: Some(0),
            ..EngineConfig::default()
        };
        assert!(no_frames.validate().is_err());
    }

    #[tokio::test]
    async fn replay_run_emits_peak_and_stats() {
        let engine = ToneEngine::new(replay_config());
        let mut rx = engine.subscribe();

        let samples: Vec<f64> = (0..256)
            .map(|t| 100.0 * (2.0 * std::f64::consts::PI * 20.0 * t as f64 / 256.0).cos())
            .collect();
        let handle = engine
            .start(InputSource::Replay(ReplayBackend::new(samples)))
            .unwrap();
        let outcome = handle.await.unwrap().unwrap();

        assert_eq!(outcome.frames_analyzed, 1);
        assert_eq!(engine.status(), PipelineState::Stopped);
        assert!(!engine.is_running());

        let mut peak_bin = None;
        let mut saw_stats = false;
        while let Ok(event) = rx.try_recv() {
            match event.event {
                EventKind::Peak { report, .. } => peak_bin = Some(report.bin_index),
                EventKind::Stats(_) => saw_stats = true,
                EventKind::State { .. } => {}
            }
        }
        assert_eq!(peak_bin, Some(20));
        assert!(saw_stats);
    }

    #[tokio::test]
    async fn start_reports_open_failure() {
        let engine = ToneEngine::new(EngineConfig {
            channels: 4,
            ..replay_config()
        });
        let err = engine
            .start(InputSource::Replay(ReplayBackend::new(Vec::new())))
            .err()
            .expect("start should fail");
        assert!(matches!(err, ToneError::Config(_)));
        assert_eq!(engine.status(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn stop_when_idle_is_an_error() {
        let engine = ToneEngine::new(replay_config());
        assert!(matches!(engine.stop(), Err(ToneError::NotRunning)));
    }

    #[tokio::test]
    async fn stop_ends_unbounded_capture() {
        let engine = ToneEngine::new(EngineConfig {
            max_frames: None,
            frames_per_buffer: Some(256),
            ..replay_config()
        });
        let backend = ReplayBackend::new(vec![1.0; 256 * 4]).realtime(true);
        let handle = engine.start(InputSource::Replay(backend)).unwrap();
        assert!(matches!(
            engine.start(InputSource::Replay(ReplayBackend::new(Vec::new()))),
            Err(ToneError::AlreadyRunning)
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop().unwrap();
        let outcome = handle.await.unwrap().unwrap();

        assert!(outcome.frames_analyzed >= 1);
        assert_eq!(engine.status(), PipelineState::Stopped);
        let diagnostics = engine.diagnostics_snapshot();
        assert!(diagnostics.frames_completed >= 1);
        assert_eq!(diagnostics.frames_analyzed, outcome.frames_analyzed);
    }

    #[tokio::test]
    async fn unbounded_replay_stops_when_source_runs_out() {
        let engine = ToneEngine::new(EngineConfig {
            max_frames: None,
            ..replay_config()
        });
        let handle = engine
            .start(InputSource::Replay(ReplayBackend::new(vec![1.0; 256 * 2 + 10])))
            .unwrap();
        let outcome = handle.await.unwrap().unwrap();

        assert_eq!(outcome.frames_analyzed, 3);
        assert_eq!(engine.status(), PipelineState::Stopped);
    }
}
