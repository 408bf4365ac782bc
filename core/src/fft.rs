//! Real-input FFT of one audio frame.
//!
//! The receiver only ever transforms real-valued frames and consumes
//! magnitudes, so the analyzer wraps a [`realfft`] real-to-complex plan and
//! owns all of its buffers; nothing is allocated per frame.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{ModemError, Result};
use crate::MAX_SAMPLES_PER_FRAME;

pub struct SpectrumAnalyzer {
    r2c: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    n: usize,
}

impl SpectrumAnalyzer {
    /// Plan a transform of `n` real samples. `n` must be a power of two no
    /// larger than [`MAX_SAMPLES_PER_FRAME`].
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 || n > MAX_SAMPLES_PER_FRAME || !n.is_power_of_two() {
            return Err(ModemError::InvalidParameters(format!(
                "FFT size {n} must be a power of two in 1..={MAX_SAMPLES_PER_FRAME}"
            )));
        }
        let r2c = RealFftPlanner::<f32>::new().plan_fft_forward(n);
        let input = vec![0.0; n];
        let output = r2c.make_output_vec();
        Ok(Self { r2c, input, output, n })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    /// Number of spectrum bins produced per frame (`n/2 + 1`).
    pub fn n_bins(&self) -> usize {
        self.n / 2 + 1
    }

    /// Forward transform of `src`, writing `n/2 + 1` complex bins scaled by
    /// `scale` into `dst`.
    pub fn forward(&mut self, src: &[f32], dst: &mut [Complex<f32>], scale: f32) -> Result<()> {
        if src.len() != self.n || dst.len() != self.n_bins() {
            return Err(ModemError::InvalidParameters(format!(
                "FFT buffer mismatch: src {} dst {} for size {}",
                src.len(),
                dst.len(),
                self.n
            )));
        }
        self.input.copy_from_slice(src);
        self.r2c
            .process(&mut self.input, dst)
            .map_err(|e| ModemError::InvalidParameters(format!("FFT process failed: {e:?}")))?;
        for v in dst.iter_mut() {
            *v *= scale;
        }
        Ok(())
    }

    /// Magnitude spectrum of one frame. `out` is resized to `n/2 + 1`.
    pub fn magnitudes(&mut self, frame: &[f32], out: &mut Vec<f32>) -> Result<()> {
        if frame.len() != self.n {
            return Err(ModemError::InvalidParameters(format!(
                "frame of {} samples fed to FFT of size {}",
                frame.len(),
                self.n
            )));
        }
        self.input.copy_from_slice(frame);
        self.r2c
            .process(&mut self.input, &mut self.output)
            .map_err(|e| ModemError::InvalidParameters(format!("FFT process failed: {e:?}")))?;
        out.clear();
        out.extend(self.output.iter().map(|c| c.norm()));
        Ok(())
    }
}
