//! Event types emitted by the pipeline.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON (the CLI prints one event per line with `--json`).

use serde::{Deserialize, Serialize};

use crate::spectrum::PeakReport;

// ---------------------------------------------------------------------------
// Pipeline state
// ---------------------------------------------------------------------------

/// Lifecycle state of the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Nothing allocated yet.
    Idle,
    /// Frame, plan and stream allocated; stream not started.
    Initialized,
    /// Stream running; frames are analyzed as they complete.
    Capturing,
    /// Stream finished; closing and computing statistics.
    Draining,
    /// Terminal: capture finished cleanly.
    Stopped,
    /// Terminal: setup or backend failure.
    Failed,
}

// ---------------------------------------------------------------------------
// Capture statistics
// ---------------------------------------------------------------------------

/// Amplitude summary over the whole captured buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    /// Largest absolute sample value.
    pub peak_amplitude: f64,
    /// Mean absolute sample value.
    pub average_amplitude: f64,
    pub sample_count: usize,
}

impl CaptureStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut peak = 0.0f64;
        let mut sum = 0.0f64;
        for &x in samples {
            let magnitude = x.abs();
            if magnitude > peak {
                peak = magnitude;
            }
            sum += magnitude;
        }
        Self {
            peak_amplitude: peak,
            average_amplitude: sum / samples.len() as f64,
            sample_count: samples.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub event: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    State {
        state: PipelineState,
        /// Optional human-readable detail (e.g. error message).
        detail: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Peak {
        frame: usize,
        report: PeakReport,
        /// Calibrated frequency of `report.bin_index`.
        frequency_hz: f64,
    },
    Stats(CaptureStats),
}
