//! Biquad and One-Pole Filter Sections
//!
//! Explicit difference equations shared by every filtering stage. Biquad
//! coefficients follow the Audio EQ Cookbook
//! (https://www.w3.org/2011/audio/audio-eq-cookbook.html).

use std::f64::consts::PI;

/// Biquad response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Bell curve boost/cut
    Peak,
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
    /// Remove above frequency
    LowPass,
    /// Remove below frequency
    HighPass,
    /// Constant 0 dB peak gain band-pass
    BandPass,
}

/// Normalized biquad coefficients
///
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Pass-through coefficients
    pub const fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Calculate coefficients from cookbook formulas
    ///
    /// `gain_db` is only used by the peak and shelf shapes.
    pub fn calculate(
        kind: FilterKind,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        // Clamp frequency to valid range (below Nyquist)
        let nyquist = (sample_rate / 2.0 - 1.0).max(10.0);
        let freq = frequency.clamp(10.0, nyquist);
        let q = q.clamp(0.1, 20.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            FilterKind::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterKind::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterKind::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterKind::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterKind::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterKind::BandPass => (
                alpha,
                0.0,
                -alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Peaking filter from a linear gain (A = √gain)
    pub fn peaking_linear(sample_rate: f64, frequency: f64, q: f64, gain: f64) -> Self {
        let gain_db = 20.0 * gain.max(1e-6).log10();
        Self::calculate(FilterKind::Peak, sample_rate, frequency, gain_db, q)
    }

    /// Magnitude response at `frequency`
    pub fn magnitude_at(&self, frequency: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Biquad filter history for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Direct Form I
    #[inline]
    pub fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A biquad with independent history per channel
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs, channels: usize) -> Self {
        Self {
            coeffs,
            states: vec![BiquadState::default(); channels],
        }
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Swap coefficients, keeping history so the change does not click
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn process_sample(&mut self, channel: usize, input: f64) -> f64 {
        if channel >= self.states.len() {
            self.states.resize(channel + 1, BiquadState::default());
        }
        self.states[channel].process(input, &self.coeffs)
    }

    /// Filter a whole channel slice in place
    pub fn process_channel(&mut self, channel: usize, samples: &mut [f32]) {
        if channel >= self.states.len() {
            self.states.resize(channel + 1, BiquadState::default());
        }
        let state = &mut self.states[channel];
        for sample in samples.iter_mut() {
            *sample = state.process(*sample as f64, &self.coeffs) as f32;
        }
    }

    pub fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }

    pub fn release(&mut self) {
        self.states = Vec::new();
    }
}

/// One-pole lowpass: y = (1 - a)·x + a·y[n-1], a = exp(-2π·f/sr)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OnePole {
    a: f64,
    y1: f64,
}

impl OnePole {
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        Self {
            a: Self::pole(frequency, sample_rate),
            y1: 0.0,
        }
    }

    /// Pole position for a corner frequency
    pub fn pole(frequency: f64, sample_rate: f64) -> f64 {
        (-2.0 * PI * frequency / sample_rate).exp()
    }

    pub fn set_frequency(&mut self, frequency: f64, sample_rate: f64) {
        self.a = Self::pole(frequency, sample_rate);
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        self.y1 = (1.0 - self.a) * input + self.a * self.y1;
        self.y1
    }

    pub fn reset(&mut self) {
        self.y1 = 0.0;
    }
}
