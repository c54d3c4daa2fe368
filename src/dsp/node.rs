//! Processing Node Contract
//!
//! Every stage of the voice chain implements [`ProcessingNode`]: one block
//! of continuous signal in, the same block processed in place out.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::SettingsPatch;
use crate::error::Result;

// ============================================================================
// Stage Kind
// ============================================================================

/// The fixed, finite set of stage types a graph can hold
///
/// Declaration order is the canonical chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    HighPass,
    LowPass,
    NoiseReduction,
    VoiceEnhancement,
    Distortion,
    Compressor,
    Delay,
    Reverb,
    Mastering,
    Limiter,
    /// Preview-only metering tap; passes audio through untouched
    Meter,
}

impl StageKind {
    /// Human-readable label used in logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::HighPass => "high-pass filter",
            StageKind::LowPass => "low-pass filter",
            StageKind::NoiseReduction => "noise reduction",
            StageKind::VoiceEnhancement => "voice enhancement",
            StageKind::Distortion => "distortion",
            StageKind::Compressor => "compressor",
            StageKind::Delay => "delay",
            StageKind::Reverb => "reverb",
            StageKind::Mastering => "mastering",
            StageKind::Limiter => "limiter",
            StageKind::Meter => "meter",
        }
    }

    /// Taps observe the signal without being part of the processing chain
    pub fn is_tap(&self) -> bool {
        matches!(self, StageKind::Meter)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Node Context
// ============================================================================

/// Construction-time facts every node needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeContext {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Channels in every block this node will see
    pub channels: usize,
    /// Length of parameter ramps applied by `set_params`, in samples
    pub ramp_samples: usize,
}

impl NodeContext {
    pub fn new(sample_rate: f64, channels: usize, ramp_samples: usize) -> Self {
        Self {
            sample_rate,
            channels,
            ramp_samples,
        }
    }

    /// Highest usable filter frequency for this sample rate
    pub fn max_frequency(&self) -> f64 {
        self.sample_rate * 0.49
    }
}

// ============================================================================
// Processing Node Trait
// ============================================================================

/// Uniform contract for one DSP stage
///
/// Nodes own their coefficients and history. They hold no settings beyond
/// what the last `set_params` pushed.
pub trait ProcessingNode: Send {
    /// Which stage this node implements
    fn kind(&self) -> StageKind;

    /// Process one block in place
    ///
    /// Block length and channel count are preserved.
    fn process(&mut self, block: &mut SampleBuffer) -> Result<()>;

    /// Apply the fields present in `patch`; absent fields are untouched
    ///
    /// Calling twice with the same patch has the same effect as once.
    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()>;

    /// Clear filter history and envelopes
    fn reset(&mut self);

    /// Release buffers and sub-stages
    ///
    /// Safe to call more than once.
    fn dispose(&mut self);

    /// Delay this node adds to the signal, in samples
    fn latency_samples(&self) -> usize {
        0
    }
}

// ============================================================================
// Parameter Smoothing
// ============================================================================

/// One-pole smoothing coefficient for a time constant in milliseconds
#[inline]
pub fn time_to_coeff(time_ms: f32, sample_rate: f64) -> f32 {
    let samples = time_ms as f64 * sample_rate / 1000.0;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp() as f32
    }
}

/// Linearly ramped parameter value
///
/// A zero-length ramp applies the new value as an immediate step.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl SmoothedParam {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Move toward `target` over `ramp_samples` samples
    pub fn set_target(&mut self, target: f32, ramp_samples: usize) {
        if ramp_samples == 0 || target == self.current {
            self.current = target;
            self.target = target;
            self.remaining = 0;
            return;
        }
        self.target = target;
        self.step = (target - self.current) / ramp_samples as f32;
        self.remaining = ramp_samples;
    }

    /// Advance one sample and return the value to use for it
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    /// Current value without advancing
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Value the ramp is heading to
    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_smoothing(&self) -> bool {
        self.remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stage_order_follows_declaration() {
        assert!(StageKind::HighPass < StageKind::LowPass);
        assert!(StageKind::Compressor < StageKind::Delay);
        assert!(StageKind::Mastering < StageKind::Limiter);
        assert!(StageKind::Limiter < StageKind::Meter);
        assert!(StageKind::Meter.is_tap());
        assert!(!StageKind::Limiter.is_tap());
    }

    #[test]
    fn test_immediate_step() {
        let mut param = SmoothedParam::new(0.0);
        param.set_target(1.0, 0);
        assert_eq!(param.next_value(), 1.0);
        assert!(!param.is_smoothing());
    }

    #[test]
    fn test_ramp_reaches_target_exactly() {
        let mut param = SmoothedParam::new(0.0);
        param.set_target(1.0, 4);
        let values: Vec<f32> = (0..6).map(|_| param.next_value()).collect();
        assert_relative_eq!(values[0], 0.25);
        assert_relative_eq!(values[1], 0.5);
        assert_eq!(values[3], 1.0);
        assert_eq!(values[5], 1.0);
    }

    #[test]
    fn test_time_to_coeff() {
        assert_eq!(time_to_coeff(0.0, 48000.0), 0.0);
        let c = time_to_coeff(10.0, 48000.0);
        assert!(c > 0.99 && c < 1.0);
    }
}
