//! # tonescope-core
//!
//! Live capture-to-spectrum engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureBackend callback → CaptureSession → SampleFrame (atomic cursor)
//!                                                              │
//!                                          PipelineDriver poll loop (spawn_blocking)
//!                                                              │
//!                                      TransformPlan → SpectrumEngine::execute
//!                                                              │
//!                                    SpectrumPostProcessor → PeakReport → ReportSink
//! ```
//!
//! The capture callback is zero-alloc and lock-free. All heap work happens on
//! the driver thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod dump;
pub mod engine;
pub mod error;
pub mod report;
pub mod spectrum;

// Convenience re-exports for downstream crates
pub use audio::ReplayBackend;
pub use buffering::SampleFrame;
pub use dump::RawSampleFormat;
pub use engine::{CaptureOutcome, EngineConfig, InputSource, ToneEngine};
pub use error::{Result, ToneError};
pub use report::{CaptureStats, EventKind, PipelineState, ToneEvent};
pub use spectrum::{MagnitudeMode, PeakReport};
