//! Multiband Noise Reduction
//!
//! Four fixed bands, each with its own downward expander:
//!
//! | Band | Range (Hz)  | Sensitivity |
//! |------|-------------|-------------|
//! | 0    | 60 - 250    | 0.8         |
//! | 1    | 250 - 1000  | 1.0         |
//! | 2    | 1000 - 4000 | 0.6         |
//! | 3    | 4000 - 8000 | 1.2         |
//!
//! Each band is isolated with a band-pass biquad and its gain change is
//! added back onto the full-band signal, `y = x + Σ (g_b - 1)·band_b`, so
//! unity gains leave the input exactly as it was.

use tracing::debug;

use crate::analysis::spectrum::SpectrumAnalyzer;
use crate::dsp::biquad::{Biquad, BiquadCoeffs, FilterKind};
use crate::dsp::node::{time_to_coeff, NodeContext, ProcessingNode, StageKind};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{SettingsPatch, UNIT_RANGE};
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Band edges in Hz
pub const BANDS: [(f64, f64); 4] = [(60.0, 250.0), (250.0, 1000.0), (1000.0, 4000.0), (4000.0, 8000.0)];

/// Threshold multiplier per band; the voice-presence band is least aggressive
pub const BAND_SENSITIVITY: [f32; 4] = [0.8, 1.0, 0.6, 1.2];

/// Lowest noise floor the estimator will report
pub const MIN_NOISE_FLOOR: f32 = 1e-5;

/// Envelope detector times
const DETECTOR_ATTACK_MS: f32 = 1.0;
const DETECTOR_RELEASE_MS: f32 = 50.0;

/// Gain smoothing times
const GAIN_ATTACK_MS: f32 = 5.0;
const GAIN_RELEASE_MS: f32 = 80.0;

// ============================================================================
// Gain Law
// ============================================================================

/// Adaptive threshold for one band
pub fn band_threshold(noise_floor: f32, intensity: f32, band: usize) -> f32 {
    noise_floor * (2.0 + intensity * 3.0) * BAND_SENSITIVITY[band]
}

/// Downward expander gain for a detector level
///
/// Unity at or above the threshold. Below it the gain falls quadratically
/// toward the reduction floor `1 - intensity·0.7`. For a fixed level and
/// threshold the gain never increases with intensity.
pub fn expander_gain(level: f32, threshold: f32, intensity: f32) -> f32 {
    if threshold <= 0.0 || level >= threshold {
        return 1.0;
    }
    let floor = 1.0 - intensity.clamp(0.0, 1.0) * 0.7;
    let ratio = (level.max(0.0) / threshold).min(1.0);
    floor + (1.0 - floor) * ratio * ratio
}

/// Noise floor estimate from lightweight spectral features of channel 0
///
/// Spectral RMS scaled by 0.1, made more aggressive for bright content
/// (centroid above 3 kHz) and for content with a high 95% rolloff.
pub fn estimate_noise_floor(buffer: &SampleBuffer, analyzer: &SpectrumAnalyzer) -> Result<f32> {
    buffer.ensure_processable()?;
    let spectrum = analyzer.analyze(buffer.channel(0), buffer.sample_rate)?;

    let mut floor = spectrum.rms() as f32 * 0.1;
    let centroid = spectrum.centroid();
    let rolloff = spectrum.rolloff(0.95);
    if centroid > 3000.0 {
        floor *= 1.3;
    }
    if rolloff > 8000.0 {
        floor *= 1.2;
    }
    let floor = floor.max(MIN_NOISE_FLOOR);
    debug!(floor, centroid, rolloff, "noise floor estimated");
    Ok(floor)
}

// ============================================================================
// Band Expander
// ============================================================================

#[derive(Debug, Clone)]
struct BandExpander {
    filter: Biquad,
    threshold: f32,
    envelope: f32,
    gain: f32,
}

impl BandExpander {
    fn new(ctx: &NodeContext, band: usize, threshold: f32) -> Self {
        let (lo, hi) = BANDS[band];
        let center = (lo * hi).sqrt().min(ctx.max_frequency());
        let q = hi / lo / 2.0;
        Self {
            filter: Biquad::new(
                BiquadCoeffs::calculate(FilterKind::BandPass, ctx.sample_rate, center, 0.0, q),
                ctx.channels,
            ),
            threshold,
            envelope: 0.0,
            gain: 1.0,
        }
    }

    fn reset(&mut self) {
        self.filter.reset();
        self.envelope = 0.0;
        self.gain = 1.0;
    }
}

// ============================================================================
// Noise Reduction Stage
// ============================================================================

/// Four-band adaptive downward expander
#[derive(Debug, Clone)]
pub struct NoiseReduction {
    noise_floor: f32,
    intensity: f32,
    bands: Vec<BandExpander>,
    bypassed: bool,
    detector_attack: f32,
    detector_release: f32,
    gain_attack: f32,
    gain_release: f32,
    /// Per-band filtered sample for the current frame, reused across frames
    scratch: Vec<Vec<f32>>,
}

impl NoiseReduction {
    pub fn new(ctx: NodeContext, noise_floor: f32, intensity: f32) -> Self {
        let intensity = UNIT_RANGE.clamp(intensity, 0.6);
        let noise_floor = if noise_floor.is_finite() {
            noise_floor.max(MIN_NOISE_FLOOR)
        } else {
            MIN_NOISE_FLOOR
        };
        Self {
            noise_floor,
            intensity,
            bands: (0..BANDS.len())
                .map(|b| BandExpander::new(&ctx, b, band_threshold(noise_floor, intensity, b)))
                .collect(),
            bypassed: false,
            detector_attack: time_to_coeff(DETECTOR_ATTACK_MS, ctx.sample_rate),
            detector_release: time_to_coeff(DETECTOR_RELEASE_MS, ctx.sample_rate),
            gain_attack: time_to_coeff(GAIN_ATTACK_MS, ctx.sample_rate),
            gain_release: time_to_coeff(GAIN_RELEASE_MS, ctx.sample_rate),
            scratch: Vec::new(),
        }
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Current thresholds, one per band
    pub fn thresholds(&self) -> Vec<f32> {
        self.bands.iter().map(|b| b.threshold).collect()
    }

    /// Current smoothed gains, one per band
    pub fn band_gains(&self) -> Vec<f32> {
        self.bands.iter().map(|b| b.gain).collect()
    }

    fn set_intensity(&mut self, intensity: f32) {
        self.intensity = UNIT_RANGE.clamp(intensity, self.intensity);
        for (b, band) in self.bands.iter_mut().enumerate() {
            band.threshold = band_threshold(self.noise_floor, self.intensity, b);
        }
    }
}

impl ProcessingNode for NoiseReduction {
    fn kind(&self) -> StageKind {
        StageKind::NoiseReduction
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.bypassed || self.bands.is_empty() {
            return Ok(());
        }
        let channels = block.num_channels();
        self.scratch.resize(self.bands.len(), Vec::new());
        for lane in &mut self.scratch {
            lane.resize(channels, 0.0);
        }

        for i in 0..block.len() {
            for (b, band) in self.bands.iter_mut().enumerate() {
                // Linked detection across channels
                let mut peak = 0.0_f32;
                for (ch, samples) in block.samples.iter().enumerate() {
                    let y = band.filter.process_sample(ch, samples[i] as f64) as f32;
                    self.scratch[b][ch] = y;
                    peak = peak.max(y.abs());
                }

                let coeff = if peak > band.envelope {
                    self.detector_attack
                } else {
                    self.detector_release
                };
                band.envelope = coeff * band.envelope + (1.0 - coeff) * peak;

                let target = expander_gain(band.envelope, band.threshold, self.intensity);
                if target == band.gain {
                    continue;
                }
                let coeff = if target < band.gain {
                    self.gain_attack
                } else {
                    self.gain_release
                };
                band.gain = coeff * band.gain + (1.0 - coeff) * target;
            }

            for (ch, samples) in block.samples.iter_mut().enumerate() {
                let delta: f32 = self
                    .bands
                    .iter()
                    .zip(&self.scratch)
                    .map(|(band, lane)| (band.gain - 1.0) * lane[ch])
                    .sum();
                samples[i] += delta;
            }
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        if let Some(intensity) = patch.noise_reduction {
            self.set_intensity(intensity);
        }
        if let Some(enabled) = patch.enable_noise_reduction {
            self.bypassed = !enabled;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.bands.iter_mut().for_each(BandExpander::reset);
    }

    fn dispose(&mut self) {
        self.bands = Vec::new();
        self.scratch = Vec::new();
    }
}
