//! Fixed-size real-input transform plan with half-complex output.
//!
//! The plan owns its input buffer, its output buffer and all FFT scratch
//! space. None of them change size or address after construction, and running
//! the transform allocates nothing.
//!
//! Output layout for a transform of size `n`:
//!
//! ```text
//! [ r0, r1, ..., r(n/2), i((n+1)/2 - 1), ..., i2, i1 ]
//! ```
//!
//! i.e. real parts in ascending order followed by imaginary parts in
//! descending order. `r0` and (for even `n`) `r(n/2)` have no imaginary
//! partner.

use std::sync::Arc;

use realfft::{num_complex::Complex, RealFftPlanner, RealToComplex};

use crate::buffering::SampleFrame;
use crate::error::{Result, ToneError};

pub struct TransformPlan {
    size: usize,
    fft: Arc<dyn RealToComplex<f64>>,
    input: Box<[f64]>,
    output: Box<[f64]>,
    /// Copy of `input` handed to the transform, which clobbers its input.
    work: Box<[f64]>,
    /// The `size / 2 + 1` non-redundant bins.
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl TransformPlan {
    /// Plan a forward transform of `size` points.
    ///
    /// # Errors
    /// `ToneError::TransformPlan` when `size` is zero, `ToneError::Allocation`
    /// when the buffers cannot be reserved.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ToneError::TransformPlan(
                "transform size must be positive".into(),
            ));
        }

        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(size);
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();

        Ok(Self {
            size,
            input: zeroed(size, "transform input")?,
            output: zeroed(size, "transform output")?,
            work: zeroed(size, "transform work buffer")?,
            spectrum,
            scratch,
            fft,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn input(&self) -> &[f64] {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut [f64] {
        &mut self.input
    }

    /// Half-complex output of the last run.
    pub fn output(&self) -> &[f64] {
        &self.output
    }

    /// Snapshot the frame's samples into the bound input buffer.
    pub fn load_frame(&mut self, frame: &SampleFrame) {
        frame.copy_into(&mut self.input);
    }

    pub(crate) fn run(&mut self) -> Result<()> {
        self.work.copy_from_slice(&self.input);
        self.fft
            .process_with_scratch(&mut self.work, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| ToneError::TransformPlan(e.to_string()))?;

        let n = self.size;
        for k in 0..=n / 2 {
            self.output[k] = self.spectrum[k].re;
        }
        for k in 1..(n + 1) / 2 {
            self.output[n - k] = self.spectrum[k].im;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransformPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPlan")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

fn zeroed(len: usize, what: &'static str) -> Result<Box<[f64]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ToneError::Allocation { what, len })?;
    buf.resize(len, 0.0);
    Ok(buf.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    /// Direct O(n²) DFT in the same half-complex layout.
    fn naive_half_complex(input: &[f64]) -> Vec<f64> {
        let n = input.len();
        let mut out = vec![0.0; n];
        for k in 0..n {
            let (mut re, mut im) = (0.0, 0.0);
            for (t, &x) in input.iter().enumerate() {
                let angle = -2.0 * PI * (k * t) as f64 / n as f64;
                re += x * angle.cos();
                im += x * angle.sin();
            }
            if k <= n / 2 {
                out[k] = re;
            }
            if k > 0 && k < (n + 1) / 2 {
                out[n - k] = im;
            }
        }
        out
    }

    fn run_plan(input: &[f64]) -> Vec<f64> {
        let mut plan = TransformPlan::new(input.len()).unwrap();
        plan.input_mut().copy_from_slice(input);
        plan.run().unwrap();
        plan.output().to_vec()
    }

    #[test]
    fn matches_direct_dft_for_even_size() {
        let input = [0.5, -1.0, 2.0, 0.25, -0.75, 1.5, 3.0, -2.0];
        let expected = naive_half_complex(&input);
        for (got, want) in run_plan(&input).iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-9);
        }
    }

    #[test]
    fn matches_direct_dft_for_odd_size() {
        let input = [1.0, 2.0, -3.0, 0.5, 4.0, -1.5, 0.0];
        let expected = naive_half_complex(&input);
        for (got, want) in run_plan(&input).iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-9);
        }
    }

    #[test]
    fn dc_input_lands_in_first_slot() {
        let out = run_plan(&[2.0; 16]);
        assert_abs_diff_eq!(out[0], 32.0, epsilon = 1e-12);
        for v in &out[1..] {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn run_leaves_input_untouched() {
        let input = [1.0, -2.0, 3.0, -4.0, 5.0];
        let mut plan = TransformPlan::new(input.len()).unwrap();
        plan.input_mut().copy_from_slice(&input);
        plan.run().unwrap();
        plan.run().unwrap();
        assert_eq!(plan.input(), &input);
    }

    #[test]
    fn zero_size_is_a_plan_error() {
        assert!(matches!(
            TransformPlan::new(0),
            Err(ToneError::TransformPlan(_))
        ));
    }

    #[test]
    fn load_frame_copies_samples() {
        let frame = SampleFrame::with_frames(4, 1).unwrap();
        frame.store(2, 7.0);
        let mut plan = TransformPlan::new(4).unwrap();
        plan.load_frame(&frame);
        assert_eq!(plan.input(), &[0.0, 0.0, 7.0, 0.0]);
    }
}
