//! Decibel spectrum and peak extraction from half-complex transform output.
//!
//! ## Algorithm
//!
//! For every usable bin `i` in `[0, floor(n/2) - 1)`:
//!
//! 1. `magnitude = sqrt(out[i]^2)` (the real slot only, see [`MagnitudeMode`]).
//! 2. `db = 20 * log10(magnitude) / sample_rate`.
//! 3. Zero or non-finite magnitudes, and anything below the floor, become
//!    [`SILENCE_FLOOR_DB`].
//!
//! The peak is the first bin holding the maximum value.

use serde::{Deserialize, Serialize};

/// Value assigned to bins whose magnitude has no finite logarithm.
///
/// Real bins sit many orders of magnitude above it because of the division by
/// the sample rate.
pub const SILENCE_FLOOR_DB: f64 = -1.0e3;

/// MIDI-style scale applied to a bin's decibel value.
pub const VELOCITY_SCALE: f64 = 127.0;

/// Which half-complex slots contribute to a bin's magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagnitudeMode {
    /// `|out[i]|`, the real slot alone. Undercounts interior bins whose
    /// energy sits in the imaginary part.
    #[default]
    Real,
    /// `sqrt(out[i]^2 + out[n - i]^2)` for interior bins.
    Paired,
}

/// Decibel magnitudes for one analyzed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumBins {
    pub magnitudes_db: Vec<f64>,
    sample_rate: u32,
    transform_size: usize,
}

impl SpectrumBins {
    pub fn len(&self) -> usize {
        self.magnitudes_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes_db.is_empty()
    }

    /// Width of one bin in Hz (`sample_rate / transform_size`).
    pub fn bin_width_hz(&self) -> f64 {
        f64::from(self.sample_rate) / self.transform_size as f64
    }

    /// Calibrated centre frequency of `bin`.
    pub fn frequency_of(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_width_hz()
    }

    /// Highest bin; ties resolve to the lowest index.
    pub fn peak(&self) -> Option<PeakReport> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &value) in self.magnitudes_db.iter().enumerate() {
            match best {
                Some((_, top)) if value <= top => {}
                _ => best = Some((i, value)),
            }
        }
        best.map(|(bin_index, value_db)| PeakReport::new(bin_index, value_db))
    }
}

/// Dominant bin of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakReport {
    /// Raw bin index. Equal to Hz only when the frame spans exactly one second.
    pub bin_index: usize,
    pub value_db: f64,
    /// `value_db × 127`.
    pub velocity: f64,
}

impl PeakReport {
    pub fn new(bin_index: usize, value_db: f64) -> Self {
        Self {
            bin_index,
            value_db,
            velocity: value_db * VELOCITY_SCALE,
        }
    }
}

/// Number of bins analyzed for a transform of `transform_size` points.
pub fn usable_bin_count(transform_size: usize) -> usize {
    (transform_size / 2).saturating_sub(1)
}

/// Converts transform output into [`SpectrumBins`].
#[derive(Debug, Clone)]
pub struct SpectrumPostProcessor {
    sample_rate: u32,
    bin_count: usize,
    mode: MagnitudeMode,
}

impl SpectrumPostProcessor {
    /// Processor for a transform of `transform_size` points.
    pub fn new(sample_rate: u32, transform_size: usize) -> Self {
        Self::with_bin_count(sample_rate, usable_bin_count(transform_size))
    }

    pub fn with_bin_count(sample_rate: u32, bin_count: usize) -> Self {
        Self {
            sample_rate,
            bin_count,
            mode: MagnitudeMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: MagnitudeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn compute(&self, transform_output: &[f64]) -> SpectrumBins {
        let n = transform_output.len();
        let bins = self.bin_count.min(n);
        let rate = f64::from(self.sample_rate);

        let magnitudes_db = (0..bins)
            .map(|i| {
                let re = transform_output[i];
                let magnitude = match self.mode {
                    MagnitudeMode::Real => (re * re).sqrt(),
                    MagnitudeMode::Paired if i > 0 && i < n - i => {
                        let im = transform_output[n - i];
                        (re * re + im * im).sqrt()
                    }
                    MagnitudeMode::Paired => re.abs(),
                };
                to_db(magnitude, rate)
            })
            .collect();

        SpectrumBins {
            magnitudes_db,
            sample_rate: self.sample_rate,
            transform_size: n,
        }
    }
}

fn to_db(magnitude: f64, sample_rate: f64) -> f64 {
    if magnitude.is_finite() && magnitude > 0.0 {
        let db = 20.0 * magnitude.log10() / sample_rate;
        if db.is_finite() {
            return db.max(SILENCE_FLOOR_DB);
        }
    }
    SILENCE_FLOOR_DB
}
