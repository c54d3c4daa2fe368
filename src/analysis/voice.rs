//! Voice Profile Analysis
//!
//! One stateless pass over the first channel of a buffer:
//! - Fundamental frequency by autocorrelation over 50-800 Hz
//! - Spectral centroid and formant peaks from a Welch spectrum
//! - Harmonic-to-total energy ratio around multiples of f0
//! - A coarse male/female classification
//!
//! Multi-channel input is analyzed from channel 0 only; voice material is
//! expected to be mono or near-mono.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::spectrum::{Spectrum, SpectrumAnalyzer};
use crate::engine::buffer::{rms_linear, SampleBuffer};
use crate::error::{Result, VoxError};

// ============================================================================
// Constants
// ============================================================================

/// Pitch search range in Hz
pub const MIN_F0_HZ: f64 = 50.0;
pub const MAX_F0_HZ: f64 = 800.0;

/// Longest stretch of signal used for harmonic strength
const MAX_PITCH_WINDOW: usize = 16384;

/// Relative tolerance around each harmonic
const HARMONIC_TOLERANCE: f64 = 0.1;

/// Formant peaks reported
const MAX_FORMANTS: usize = 4;

/// Below this RMS the input is treated as silence
const SILENCE_RMS: f32 = 1e-6;

// ============================================================================
// Voice Profile
// ============================================================================

/// Coarse voice classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceType {
    Male,
    Female,
    Unknown,
}

impl fmt::Display for VoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoiceType::Male => "male",
            VoiceType::Female => "female",
            VoiceType::Unknown => "unknown",
        })
    }
}

/// Classify from fundamental frequency and first formant
pub fn classify_voice(f0: f64, first_formant: f64) -> VoiceType {
    if f0 < 130.0 && first_formant < 500.0 {
        VoiceType::Male
    } else if f0 > 180.0 && first_formant > 500.0 {
        VoiceType::Female
    } else {
        VoiceType::Unknown
    }
}

/// Voice characteristics extracted from one buffer; never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    /// Fundamental frequency in Hz
    pub fundamental_freq: f64,
    /// Up to four spectral peaks, strongest first
    pub formants: Vec<f64>,
    /// Spectral centroid in Hz
    pub spectral_centroid: f64,
    /// Share of energy near multiples of f0 (0-1)
    pub harmonic_ratio: f64,
    pub voice_type: VoiceType,
}

impl VoiceProfile {
    /// Formant `index`, if that many peaks were found
    pub fn formant(&self, index: usize) -> Option<f64> {
        self.formants.get(index).copied()
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Voice profile extractor
#[derive(Debug, Default)]
pub struct VoiceAnalyzer {
    spectrum: SpectrumAnalyzer,
}

impl VoiceAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spectrum(spectrum: SpectrumAnalyzer) -> Self {
        Self { spectrum }
    }

    /// Analyze the first channel of `buffer`
    ///
    /// Fails on empty, silent, too-short or aperiodic input.
    pub fn analyze(&self, buffer: &SampleBuffer) -> Result<VoiceProfile> {
        buffer.ensure_processable()?;
        let samples = buffer.channel(0);
        let sample_rate = buffer.sample_rate as f64;

        let min_len = (2.0 * sample_rate / MIN_F0_HZ).ceil() as usize;
        if samples.len() < min_len {
            return Err(VoxError::AnalysisFailed {
                reason: format!(
                    "need at least {} samples for pitch analysis, got {}",
                    min_len,
                    samples.len()
                ),
            });
        }
        if rms_linear(samples) < SILENCE_RMS {
            return Err(VoxError::AnalysisFailed {
                reason: "input is silent".to_string(),
            });
        }

        let f0 = estimate_f0(samples, sample_rate).ok_or_else(|| VoxError::AnalysisFailed {
            reason: "no periodicity found in 50-800 Hz".to_string(),
        })?;
        let spectrum = self.spectrum.analyze(samples, buffer.sample_rate)?;

        let formants: Vec<f64> = spectrum
            .local_maxima()
            .into_iter()
            .take(MAX_FORMANTS)
            .map(|(bin, _)| spectrum.frequency(bin))
            .collect();
        let voice_type = if formants.len() < 2 {
            VoiceType::Unknown
        } else {
            classify_voice(f0, formants[0])
        };

        let profile = VoiceProfile {
            fundamental_freq: f0,
            spectral_centroid: spectrum.centroid(),
            harmonic_ratio: harmonic_ratio(&spectrum, f0),
            formants,
            voice_type,
        };
        debug!(
            f0 = profile.fundamental_freq,
            centroid = profile.spectral_centroid,
            voice = %profile.voice_type,
            "voice profile extracted"
        );
        Ok(profile)
    }
}

/// Loudest stretch of at most `MAX_PITCH_WINDOW` samples
fn loudest_window(samples: &[f32]) -> &[f32] {
    if samples.len() <= MAX_PITCH_WINDOW {
        return samples;
    }
    let hop = MAX_PITCH_WINDOW / 4;
    let mut best = (0, -1.0_f64);
    let mut start = 0;
    while start + MAX_PITCH_WINDOW <= samples.len() {
        let energy: f64 = samples[start..start + MAX_PITCH_WINDOW]
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        if energy > best.1 {
            best = (start, energy);
        }
        start += hop;
    }
    &samples[best.0..best.0 + MAX_PITCH_WINDOW]
}

/// Autocorrelation pitch estimate, `None` when nothing correlates
///
/// Takes the lag in the 50-800 Hz range with the highest mean sample
/// product over the whole signal and returns `sample_rate / lag`.
pub fn estimate_f0(samples: &[f32], sample_rate: f64) -> Option<f64> {
    let min_lag = ((sample_rate / MAX_F0_HZ).floor() as usize).max(1);
    let max_lag = ((sample_rate / MIN_F0_HZ).floor() as usize).min(samples.len().saturating_sub(1));
    if min_lag + 2 >= max_lag {
        return None;
    }

    let (best_lag, best) = (min_lag..max_lag)
        .map(|lag| {
            let count = samples.len() - lag;
            let sum: f64 = samples[..count]
                .iter()
                .zip(&samples[lag..])
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum();
            (lag, sum / count as f64)
        })
        // Strict comparison keeps the shortest lag on ties
        .fold((min_lag, 0.0_f64), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
    if best <= 0.0 {
        return None;
    }

    Some(sample_rate / best_lag as f64)
}

/// Fraction of spectral energy within ±10% of a multiple of `f0`
pub fn harmonic_ratio(spectrum: &Spectrum, f0: f64) -> f64 {
    let total = spectrum.total_power();
    if total <= 0.0 || f0 <= 0.0 {
        return 0.0;
    }
    let harmonic: f64 = spectrum
        .power
        .iter()
        .enumerate()
        .filter(|(k, _)| {
            let freq = spectrum.frequency(*k);
            let n = (freq / f0).round();
            n >= 1.0 && (freq - n * f0).abs() < f0 * HARMONIC_TOLERANCE
        })
        .map(|(_, p)| p)
        .sum();
    harmonic / total
}

// ============================================================================
// Voice Metrics
// ============================================================================

/// Lightweight per-buffer voice indicators, each in 0..=1
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMetrics {
    /// Energy-based voice activity
    pub voice_activity: f32,
    /// First-difference energy relative to total energy
    pub spectral_clarity: f32,
    /// Strongest normalized autocorrelation over short lags
    pub harmonic_strength: f32,
    /// 10th percentile magnitude, scaled
    pub noise_level: f32,
    /// Wall-clock processing time of the render that produced the buffer
    pub processing_latency_ms: f64,
}

impl VoiceMetrics {
    /// Measure channel 0 of `buffer`
    pub fn measure(buffer: &SampleBuffer, processing_latency_ms: f64) -> Self {
        let samples = match buffer.samples.first() {
            Some(ch) if !ch.is_empty() => ch.as_slice(),
            _ => {
                return Self {
                    processing_latency_ms,
                    ..Self::default()
                }
            }
        };
        let n = samples.len() as f64;

        let energy: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        let voice_activity = (energy / n * 10.0).min(1.0) as f32;

        let diff_energy: f64 = samples
            .windows(2)
            .map(|w| ((w[1] - w[0]) as f64).powi(2))
            .sum();
        let spectral_clarity = if energy > 0.0 {
            (diff_energy / energy).min(1.0) as f32
        } else {
            0.0
        };

        let window = loudest_window(samples);
        let max_lag = (window.len() / 4).min(1000);
        let harmonic_strength = (50..max_lag)
            .map(|lag| {
                let sum: f64 = window[..window.len() - lag]
                    .iter()
                    .zip(&window[lag..])
                    .map(|(&a, &b)| a as f64 * b as f64)
                    .sum();
                sum.abs() / (window.len() - lag) as f64
            })
            .fold(0.0_f64, f64::max)
            .min(1.0) as f32;

        let mut magnitudes: Vec<f32> = samples.iter().map(|s| s.abs()).collect();
        magnitudes.sort_by(f32::total_cmp);
        let p10 = magnitudes[(magnitudes.len() as f64 * 0.1) as usize];
        let noise_level = (p10 * 20.0).min(1.0);

        Self {
            voice_activity,
            spectral_clarity,
            harmonic_strength,
            noise_level,
            processing_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;
    use test_case::test_case;

    /// Harmonic-rich test voice: f0 plus decaying overtones
    fn voiced(f0: f64, sr: u32, secs: f64) -> SampleBuffer {
        let len = (sr as f64 * secs) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f64 / sr as f64;
                (1..=6)
                    .map(|h| (2.0 * PI * f0 * h as f64 * t).sin() * 0.3 / h as f64)
                    .sum::<f64>() as f32
            })
            .collect();
        SampleBuffer::mono(samples, sr)
    }

    #[test_case(100.0, 400.0, VoiceType::Male ; "low pitch low formant")]
    #[test_case(200.0, 600.0, VoiceType::Female ; "high pitch high formant")]
    #[test_case(150.0, 450.0, VoiceType::Unknown ; "in between")]
    #[test_case(100.0, 700.0, VoiceType::Unknown ; "mixed cues")]
    fn test_classification(f0: f64, formant: f64, expected: VoiceType) {
        assert_eq!(classify_voice(f0, formant), expected);
    }

    #[test_case(100.0 ; "low voice")]
    #[test_case(220.0 ; "high voice")]
    #[test_case(440.0 ; "sung note")]
    fn test_pitch_of_harmonic_signal(f0: f64) {
        let buffer = voiced(f0, 48000, 0.5);
        let estimate = estimate_f0(buffer.channel(0), 48000.0).unwrap();
        assert_relative_eq!(estimate, f0, max_relative = 0.02);
    }

    #[test]
    fn test_pitch_is_strongest_lag_not_first_peak() {
        // 200 Hz with a weak 100 Hz undertone: the 200 Hz lag is a near-best
        // local peak, but the full period at 100 Hz correlates higher
        let sr = 48000;
        let samples: Vec<f32> = (0..sr / 2)
            .map(|i| {
                let t = i as f64 / sr as f64;
                ((2.0 * PI * 200.0 * t).sin() + 0.1 * (2.0 * PI * 100.0 * t).sin()) as f32
            })
            .collect();
        let estimate = estimate_f0(&samples, sr as f64).unwrap();
        assert_relative_eq!(estimate, 100.0, max_relative = 0.01);
    }

    #[test]
    fn test_profile_of_voiced_signal() {
        let profile = VoiceAnalyzer::new().analyze(&voiced(100.0, 48000, 1.0)).unwrap();
        assert_relative_eq!(profile.fundamental_freq, 100.0, max_relative = 0.02);
        assert_eq!(profile.formants.len(), 4);
        // Strongest peak is the fundamental
        assert_relative_eq!(profile.formants[0], 100.0, epsilon = 24.0);
        assert!(profile.harmonic_ratio > 0.8, "ratio {}", profile.harmonic_ratio);
        assert!(profile.spectral_centroid > 100.0 && profile.spectral_centroid < 720.0);
        assert_eq!(profile.voice_type, VoiceType::Male);
    }

    #[test]
    fn test_silence_and_short_input_fail() {
        let analyzer = VoiceAnalyzer::new();
        assert!(analyzer.analyze(&SampleBuffer::silence(1, 48000, 48000)).is_err());
        assert!(analyzer.analyze(&voiced(200.0, 48000, 0.01)).is_err());
        assert!(analyzer.analyze(&SampleBuffer::mono(vec![], 48000)).is_err());
    }

    #[test]
    fn test_metrics_ranges() {
        let metrics = VoiceMetrics::measure(&voiced(150.0, 48000, 0.5), 12.5);
        for value in [
            metrics.voice_activity,
            metrics.spectral_clarity,
            metrics.harmonic_strength,
            metrics.noise_level,
        ] {
            assert!((0.0..=1.0).contains(&value));
        }
        assert!(metrics.voice_activity > 0.0);
        assert_eq!(metrics.processing_latency_ms, 12.5);

        let empty = VoiceMetrics::measure(&SampleBuffer::mono(vec![], 48000), 1.0);
        assert_eq!(empty.voice_activity, 0.0);
    }
}
