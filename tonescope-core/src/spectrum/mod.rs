//! Frame transform and spectrum post-processing.
//!
//! ```text
//! SampleFrame ──load_frame──► TransformPlan.input
//!                                   │ SpectrumEngine::execute
//!                             TransformPlan.output (half-complex)
//!                                   │ SpectrumPostProcessor::compute
//!                             SpectrumBins ──peak──► PeakReport
//! ```

pub mod plan;
pub mod post;

use crate::error::Result;

pub use plan::TransformPlan;
pub use post::{
    usable_bin_count, MagnitudeMode, PeakReport, SpectrumBins, SpectrumPostProcessor,
    SILENCE_FLOOR_DB, VELOCITY_SCALE,
};

/// Runs planned transforms.
///
/// Holds no state of its own: everything the transform touches lives in the
/// [`TransformPlan`]. The caller must finish writing the plan's input buffer
/// before calling [`execute`](Self::execute).
#[derive(Debug, Default, Clone, Copy)]
pub struct SpectrumEngine;

impl SpectrumEngine {
    pub fn new() -> Self {
        Self
    }

    /// Transform the plan's input buffer into its output buffer.
    pub fn execute(&self, plan: &mut TransformPlan) -> Result<()> {
        plan.run()
    }
}
