//! Streaming sample-rate conversion by windowed-sinc interpolation.
//!
//! The kernel spans [`Resampler::WIDTH`] input samples; its values are read
//! from a table sampled `SAMPLES_PER_ZERO_CROSSING` times per zero crossing
//! with linear interpolation in between. A short delay line carries the tail
//! of each input block into the next call, so arbitrarily chunked input
//! produces the same output as one large call.

const SAMPLES_PER_ZERO_CROSSING: usize = 32;
const DELAY_SIZE: usize = 140;
const HALF_WIDTH: usize = Resampler::WIDTH / 2;

pub struct Resampler {
    sinc_table: Vec<f32>,
    delay: Vec<f32>,
    /// Input-domain position of the next output sample.
    time: f64,
    /// Input samples consumed so far, including the priming zeros.
    total_in: u64,
}

impl Resampler {
    /// Number of neighboring input samples used to interpolate one output
    /// sample. Processing time grows linearly with this width.
    pub const WIDTH: usize = 64;

    pub fn new() -> Self {
        let mut resampler = Self {
            sinc_table: make_sinc_table(),
            delay: Vec::new(),
            time: 0.0,
            total_in: 0,
        };
        resampler.reset();
        resampler
    }

    /// Restore the exact post-construction state. A reset resampler produces
    /// bit-identical output for identical input.
    pub fn reset(&mut self) {
        self.delay.clear();
        self.delay.resize(Self::WIDTH, 0.0);
        self.total_in = Self::WIDTH as u64;
        self.time = HALF_WIDTH as f64;
    }

    /// Input samples consumed since construction or the last reset.
    pub fn n_samples_total(&self) -> usize {
        (self.total_in - Self::WIDTH as u64) as usize
    }

    /// Resample `input` by `factor = src_rate / dst_rate`.
    ///
    /// Returns roughly `input.len() / factor` samples; the exact count per
    /// call varies by one as the fractional-time accumulator carries over.
    /// Output lags the input by `WIDTH / 2` samples of filter delay.
    pub fn resample(&mut self, factor: f32, input: &[f32]) -> Vec<f32> {
        let factor = factor as f64;
        debug_assert!(factor > 0.0);

        let base = self.total_in as i64 - self.delay.len() as i64;
        let mut work = std::mem::take(&mut self.delay);
        work.extend_from_slice(input);
        let abs_end = base + work.len() as i64;

        let mut out = Vec::with_capacity((input.len() as f64 / factor) as usize + 2);
        while (self.time.floor() as i64) + (HALF_WIDTH as i64) <= abs_end - 1 {
            let i0 = self.time.floor() as i64;
            let frac = self.time - i0 as f64;

            let mut acc = 0.0f64;
            for j in (1 - HALF_WIDTH as i64)..=(HALF_WIDTH as i64) {
                let idx = (i0 + j - base) as usize;
                acc += work[idx] as f64 * self.sinc(j as f64 - frac);
            }
            out.push(acc as f32);
            self.time += factor;
        }

        self.total_in += input.len() as u64;
        let keep = DELAY_SIZE.min(work.len());
        work.drain(..work.len() - keep);
        self.delay = work;
        out
    }

    /// Windowed sinc at offset `x`, via table lookup with linear interpolation.
    fn sinc(&self, x: f64) -> f64 {
        let x = x.abs();
        if x >= HALF_WIDTH as f64 {
            return 0.0;
        }
        let pos = x * SAMPLES_PER_ZERO_CROSSING as f64;
        let i = pos as usize;
        let frac = pos - i as f64;
        self.sinc_table[i] as f64 * (1.0 - frac) + self.sinc_table[i + 1] as f64 * frac
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new()
    }
}

fn make_sinc_table() -> Vec<f32> {
    let n = HALF_WIDTH * SAMPLES_PER_ZERO_CROSSING + 2;
    let mut table = vec![0.0f32; n];
    for (i, entry) in table.iter_mut().enumerate() {
        let x = i as f64 / SAMPLES_PER_ZERO_CROSSING as f64;
        if x >= HALF_WIDTH as f64 {
            continue;
        }
        let sinc = if x == 0.0 {
            1.0
        } else {
            (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
        };
        // Blackman window over the kernel span
        let u = x / HALF_WIDTH as f64;
        let window = 0.42 + 0.5 * (std::f64::consts::PI * u).cos()
            + 0.08 * (2.0 * std::f64::consts::PI * u).cos();
        *entry = (sinc * window) as f32;
    }
    table
}
