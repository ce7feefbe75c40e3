//! Reporting surface of the pipeline.
//!
//! The driver pushes state changes, per-frame peaks and final statistics into
//! a [`ReportSink`]. [`LogSink`] writes them to the `tracing` log and
//! [`BroadcastSink`] turns them into serialisable [`ToneEvent`]s on a
//! `tokio::sync::broadcast` channel.

pub mod events;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::broadcast;
use tracing::info;

use crate::spectrum::{PeakReport, SpectrumBins};

pub use events::{CaptureStats, EventKind, PipelineState, ToneEvent};

/// Receives everything the pipeline reports.
pub trait ReportSink {
    fn state_changed(&mut self, _state: PipelineState, _detail: Option<&str>) {}

    /// One analyzed frame. `frame` counts from zero.
    fn peak(&mut self, frame: usize, report: &PeakReport, bins: &SpectrumBins);

    fn stats(&mut self, stats: &CaptureStats);
}

/// Writes reports to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn state_changed(&mut self, state: PipelineState, detail: Option<&str>) {
        info!(?state, detail, "pipeline state");
    }

    fn peak(&mut self, frame: usize, report: &PeakReport, bins: &SpectrumBins) {
        info!(
            frame,
            bin = report.bin_index,
            frequency_hz = bins.frequency_of(report.bin_index),
            velocity = report.velocity,
            "detected frequency"
        );
    }

    fn stats(&mut self, stats: &CaptureStats) {
        info!(
            peak_amplitude = stats.peak_amplitude,
            average_amplitude = stats.average_amplitude,
            "sample statistics"
        );
    }
}

/// Forwards reports to broadcast subscribers.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ToneEvent>,
    seq: Arc<AtomicU64>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<ToneEvent>, seq: Arc<AtomicU64>) -> Self {
        Self { tx, seq }
    }

    fn send(&self, event: EventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error.
        let _ = self.tx.send(ToneEvent { seq, event });
    }
}

impl ReportSink for BroadcastSink {
    fn state_changed(&mut self, state: PipelineState, detail: Option<&str>) {
        self.send(EventKind::State {
            state,
            detail: detail.map(str::to_owned),
        });
    }

    fn peak(&mut self, frame: usize, report: &PeakReport, bins: &SpectrumBins) {
        self.send(EventKind::Peak {
            frame,
            report: *report,
            frequency_hz: bins.frequency_of(report.bin_index),
        });
    }

    fn stats(&mut self, stats: &CaptureStats) {
        self.send(EventKind::Stats(*stats));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::SpectrumPostProcessor;

    #[test]
    fn broadcast_sink_numbers_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut sink = BroadcastSink::new(tx, Arc::new(AtomicU64::new(5)));

        let bins = SpectrumPostProcessor::new(100, 200).compute(&[1.0; 200]);
        sink.state_changed(PipelineState::Capturing, None);
        sink.peak(0, &PeakReport::new(4, 0.1), &bins);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.seq, 5);
        assert!(matches!(
            first.event,
            EventKind::State {
                state: PipelineState::Capturing,
                ..
            }
        ));
        assert_eq!(second.seq, 6);
        match second.event {
            EventKind::Peak {
                report,
                frequency_hz,
                ..
            } => {
                assert_eq!(report.bin_index, 4);
                assert!((frequency_hz - 2.0).abs() < 1e-12);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_sink_writes_peaks_and_stats() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        let bins = SpectrumPostProcessor::new(100, 200).compute(&[1.0; 200]);
        tracing::subscriber::with_default(subscriber, || {
            let mut sink = LogSink;
            sink.state_changed(PipelineState::Failed, Some("device unplugged"));
            sink.peak(3, &PeakReport::new(4, 0.1), &bins);
            sink.stats(&CaptureStats::from_samples(&[2.0, -4.0]));
        });

        let logged = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logged.contains("pipeline state"));
        assert!(logged.contains("device unplugged"));
        assert!(logged.contains("detected frequency"));
        assert!(logged.contains("frame=3"));
        assert!(logged.contains("bin=4"));
        assert!(logged.contains("frequency_hz=2.0"));
        assert!(logged.contains("peak_amplitude=4.0"));
        assert!(logged.contains("average_amplitude=3.0"));
    }

    #[test]
    fn sending_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel(1);
        drop(rx);
        let mut sink = BroadcastSink::new(tx, Arc::new(AtomicU64::new(0)));
        sink.stats(&CaptureStats::from_samples(&[1.0]));
    }
}
