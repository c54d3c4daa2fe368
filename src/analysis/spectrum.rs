//! Spectrum Analysis
//!
//! Welch-averaged power spectra behind a [`SpectrumBackend`] strategy. The
//! FFT backend (rustfft) is selected when the `fft` feature is compiled in;
//! otherwise a portable DFT is used. Callers never see which one ran.

use std::f64::consts::PI;

use crate::error::{Result, VoxError};

/// Default analysis frame length
pub const DEFAULT_FRAME_SIZE: usize = 4096;

// ============================================================================
// Backends
// ============================================================================

/// Strategy computing a one-sided power spectrum of one windowed frame
pub trait SpectrumBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// `|X[k]|²` for `k = 0..=N/2`
    fn power_spectrum(&self, frame: &[f64]) -> Vec<f64>;
}

/// rustfft-backed spectrum; plans are cached per frame length
#[cfg(feature = "fft")]
pub struct FftBackend {
    planner: std::sync::Mutex<rustfft::FftPlanner<f64>>,
}

#[cfg(feature = "fft")]
impl Default for FftBackend {
    fn default() -> Self {
        Self {
            planner: std::sync::Mutex::new(rustfft::FftPlanner::new()),
        }
    }
}

#[cfg(feature = "fft")]
impl SpectrumBackend for FftBackend {
    fn name(&self) -> &'static str {
        "fft"
    }

    fn power_spectrum(&self, frame: &[f64]) -> Vec<f64> {
        use rustfft::num_complex::Complex;

        let n = frame.len();
        if n == 0 {
            return Vec::new();
        }
        let fft = self
            .planner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .plan_fft_forward(n);
        let mut data: Vec<Complex<f64>> = frame.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut data);
        data[..n / 2 + 1].iter().map(|c| c.norm_sqr()).collect()
    }
}

/// Direct DFT; quadratic but dependency-free
#[derive(Debug, Default)]
pub struct DftBackend;

impl SpectrumBackend for DftBackend {
    fn name(&self) -> &'static str {
        "dft"
    }

    fn power_spectrum(&self, frame: &[f64]) -> Vec<f64> {
        let n = frame.len();
        (0..n / 2 + 1)
            .map(|k| {
                let (mut re, mut im) = (0.0, 0.0);
                for (i, &x) in frame.iter().enumerate() {
                    // Reduce the phase index first to keep the argument small
                    let phase = -2.0 * PI * ((k * i) % n) as f64 / n as f64;
                    re += x * phase.cos();
                    im += x * phase.sin();
                }
                re * re + im * im
            })
            .collect()
    }
}

/// Hann window coefficient
#[inline]
fn hann(i: usize, n: usize) -> f64 {
    if n <= 1 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos())
}

// ============================================================================
// Spectrum
// ============================================================================

/// Averaged one-sided power spectrum
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Power per bin, `0..=N/2`
    pub power: Vec<f64>,
    /// Bin spacing in Hz (`sr / N`)
    pub bin_hz: f64,
    /// `N · Σw²`, for recovering time-domain energy
    norm: f64,
}

impl Spectrum {
    /// Centre frequency of bin `k`
    pub fn frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_hz
    }

    pub fn total_power(&self) -> f64 {
        self.power.iter().sum()
    }

    /// Power-weighted mean frequency, 0 for silence
    pub fn centroid(&self) -> f64 {
        let total = self.total_power();
        if total <= 0.0 {
            return 0.0;
        }
        self.power
            .iter()
            .enumerate()
            .map(|(k, p)| self.frequency(k) * p)
            .sum::<f64>()
            / total
    }

    /// Frequency below which `fraction` of the energy lies
    pub fn rolloff(&self, fraction: f64) -> f64 {
        let total = self.total_power();
        if total <= 0.0 {
            return 0.0;
        }
        let target = total * fraction.clamp(0.0, 1.0);
        let mut acc = 0.0;
        for (k, p) in self.power.iter().enumerate() {
            acc += p;
            if acc >= target {
                return self.frequency(k);
            }
        }
        self.frequency(self.power.len().saturating_sub(1))
    }

    /// Time-domain RMS recovered through Parseval
    pub fn rms(&self) -> f64 {
        let len = self.power.len();
        if len < 2 || self.norm <= 0.0 {
            return 0.0;
        }
        // Interior bins stand for both halves of the two-sided spectrum
        let interior: f64 = self.power[1..len - 1].iter().sum();
        let full = self.power[0] + 2.0 * interior + self.power[len - 1];
        (full / self.norm).sqrt()
    }

    /// Energy between two frequencies (inclusive of `lo`, exclusive of `hi`)
    pub fn energy_between(&self, lo: f64, hi: f64) -> f64 {
        self.power
            .iter()
            .enumerate()
            .filter(|(k, _)| {
                let f = self.frequency(*k);
                f >= lo && f < hi
            })
            .map(|(_, p)| p)
            .sum()
    }

    /// Strict local maxima as `(bin, power)`, strongest first
    pub fn local_maxima(&self) -> Vec<(usize, f64)> {
        let mut peaks: Vec<(usize, f64)> = self
            .power
            .windows(3)
            .enumerate()
            .filter(|(_, w)| w[1] > w[0] && w[1] > w[2])
            .map(|(i, w)| (i + 1, w[1]))
            .collect();
        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
        peaks
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Welch spectrum estimator over a chosen backend
pub struct SpectrumAnalyzer {
    backend: Box<dyn SpectrumBackend>,
    frame_size: usize,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("backend", &self.backend.name())
            .field("frame_size", &self.frame_size)
            .finish()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::probe()
    }
}

impl SpectrumAnalyzer {
    /// Pick the best backend this build supports
    pub fn probe() -> Self {
        #[cfg(feature = "fft")]
        let backend: Box<dyn SpectrumBackend> = Box::new(FftBackend::default());
        #[cfg(not(feature = "fft"))]
        let backend: Box<dyn SpectrumBackend> = Box::new(DftBackend);

        tracing::debug!(backend = backend.name(), "spectrum backend selected");
        Self::with_backend(backend, DEFAULT_FRAME_SIZE)
    }

    pub fn with_backend(backend: Box<dyn SpectrumBackend>, frame_size: usize) -> Self {
        Self {
            backend,
            frame_size: frame_size.max(4),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Welch average over Hann frames with 50% overlap
    ///
    /// Input shorter than one frame is zero-padded into a single frame.
    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Result<Spectrum> {
        if samples.is_empty() {
            return Err(VoxError::EmptyAudio);
        }
        if sample_rate == 0 {
            return Err(VoxError::invalid_audio("sample rate is zero"));
        }

        let n = self.frame_size;
        let hop = n / 2;
        let window: Vec<f64> = (0..n).map(|i| hann(i, n)).collect();
        let window_energy: f64 = window.iter().map(|w| w * w).sum();

        let mut starts: Vec<usize> = (0..)
            .map(|f| f * hop)
            .take_while(|&s| s + n <= samples.len())
            .collect();
        if starts.is_empty() {
            starts.push(0);
        }

        let mut power = vec![0.0; n / 2 + 1];
        let mut frame = vec![0.0; n];
        for &start in &starts {
            for (i, slot) in frame.iter_mut().enumerate() {
                let x = samples.get(start + i).copied().unwrap_or(0.0) as f64;
                *slot = x * window[i];
            }
            for (acc, p) in power.iter_mut().zip(self.backend.power_spectrum(&frame)) {
                *acc += p;
            }
        }
        let frames = starts.len() as f64;
        power.iter_mut().for_each(|p| *p /= frames);

        // Zero-padding lowers energy; scale the norm to the occupied span
        let occupied = samples.len().min(n);
        let norm = if samples.len() >= n {
            n as f64 * window_energy
        } else {
            n as f64 * window[..occupied].iter().map(|w| w * w).sum::<f64>()
        };

        Ok(Spectrum {
            power,
            bin_hz: sample_rate as f64 / n as f64,
            norm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f64, sr: u32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / sr as f64).sin() as f32 * amp)
            .collect()
    }

    #[test]
    fn test_sine_peak_lands_on_its_bin() {
        let analyzer = SpectrumAnalyzer::probe();
        let spectrum = analyzer.analyze(&sine(1000.0, 48000, 48000, 0.5), 48000).unwrap();
        let (bin, _) = spectrum.local_maxima()[0];
        assert!((spectrum.frequency(bin) - 1000.0).abs() <= spectrum.bin_hz);
        assert_relative_eq!(spectrum.centroid(), 1000.0, epsilon = 30.0);
    }

    #[test]
    fn test_parseval_rms() {
        let analyzer = SpectrumAnalyzer::probe();
        let spectrum = analyzer.analyze(&sine(440.0, 44100, 44100, 0.5), 44100).unwrap();
        assert_relative_eq!(spectrum.rms(), 0.5 / 2f64.sqrt(), epsilon = 0.02);
    }

    #[test]
    fn test_rolloff_orders_with_fraction() {
        let analyzer = SpectrumAnalyzer::probe();
        let mut mix = sine(200.0, 48000, 24000, 0.5);
        for (s, h) in mix.iter_mut().zip(sine(6000.0, 48000, 24000, 0.2)) {
            *s += h;
        }
        let spectrum = analyzer.analyze(&mix, 48000).unwrap();
        assert!(spectrum.rolloff(0.5) < 1000.0);
        assert!(spectrum.rolloff(0.95) > 5000.0);
    }

    #[test]
    fn test_dft_matches_fft_backend() {
        let frame: Vec<f64> = (0..64).map(|i| ((i * 7) % 13) as f64 / 13.0 - 0.5).collect();
        let dft = DftBackend.power_spectrum(&frame);
        let probed = SpectrumAnalyzer::probe();
        let other = probed.backend.power_spectrum(&frame);
        assert_eq!(dft.len(), 33);
        for (a, b) in dft.iter().zip(other.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_short_input_is_padded() {
        let analyzer = SpectrumAnalyzer::with_backend(Box::new(DftBackend), 256);
        let spectrum = analyzer.analyze(&sine(1000.0, 8000, 100, 0.5), 8000).unwrap();
        assert_eq!(spectrum.power.len(), 129);
        assert!(spectrum.rms() > 0.0);
    }

    #[test]
    fn test_empty_input_errors() {
        let analyzer = SpectrumAnalyzer::probe();
        assert!(analyzer.analyze(&[], 48000).is_err());
    }
}
