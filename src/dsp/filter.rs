//! High-Pass and Low-Pass Stages
//!
//! Second-order pass filters at the head of the chain. Cutoff changes are
//! applied as an immediate coefficient step; filter history is kept so the
//! step does not click.

use tracing::debug;

use crate::dsp::biquad::{Biquad, BiquadCoeffs, FilterKind};
use crate::dsp::node::{NodeContext, ProcessingNode, StageKind};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{SettingsPatch, HIGHPASS_RANGE, LOWPASS_RANGE};
use crate::error::Result;

/// Resonance of both pass filters
pub const PASS_FILTER_Q: f64 = 0.7;

/// Which side of the spectrum the filter removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    High,
    Low,
}

/// Biquad high-pass or low-pass stage
#[derive(Debug, Clone)]
pub struct PassFilter {
    pass: PassKind,
    ctx: NodeContext,
    frequency: f32,
    filter: Biquad,
    bypassed: bool,
}

impl PassFilter {
    /// High-pass stage at `frequency` Hz
    pub fn high_pass(ctx: NodeContext, frequency: f32) -> Self {
        Self::new(PassKind::High, ctx, frequency)
    }

    /// Low-pass stage at `frequency` Hz
    pub fn low_pass(ctx: NodeContext, frequency: f32) -> Self {
        Self::new(PassKind::Low, ctx, frequency)
    }

    fn new(pass: PassKind, ctx: NodeContext, frequency: f32) -> Self {
        let mut node = Self {
            pass,
            ctx,
            frequency: 0.0,
            filter: Biquad::new(BiquadCoeffs::identity(), ctx.channels),
            bypassed: false,
        };
        node.set_frequency(frequency);
        node
    }

    /// Current cutoff in Hz
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    fn set_frequency(&mut self, frequency: f32) {
        let (range, fallback) = match self.pass {
            PassKind::High => (HIGHPASS_RANGE, 100.0),
            PassKind::Low => (LOWPASS_RANGE, 20000.0),
        };
        self.frequency = range.clamp(frequency, fallback);
        let kind = match self.pass {
            PassKind::High => FilterKind::HighPass,
            PassKind::Low => FilterKind::LowPass,
        };
        let cutoff = (self.frequency as f64).min(self.ctx.max_frequency());
        self.filter.set_coeffs(BiquadCoeffs::calculate(
            kind,
            self.ctx.sample_rate,
            cutoff,
            0.0,
            PASS_FILTER_Q,
        ));
        debug!(stage = %self.kind(), cutoff, "pass filter updated");
    }
}

impl ProcessingNode for PassFilter {
    fn kind(&self) -> StageKind {
        match self.pass {
            PassKind::High => StageKind::HighPass,
            PassKind::Low => StageKind::LowPass,
        }
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.bypassed {
            return Ok(());
        }
        for (ch, samples) in block.channels_mut().enumerate() {
            self.filter.process_channel(ch, samples);
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        let (frequency, enabled) = match self.pass {
            PassKind::High => (patch.highpass_freq, patch.enable_highpass),
            PassKind::Low => (patch.lowpass_freq, patch.enable_lowpass),
        };
        if let Some(enabled) = enabled {
            self.bypassed = !enabled;
        }
        if let Some(frequency) = frequency {
            if frequency != self.frequency {
                self.set_frequency(frequency);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.filter.reset();
    }

    fn dispose(&mut self) {
        self.filter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, len: usize) -> SampleBuffer {
        let samples = (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin() * 0.5)
            .collect();
        SampleBuffer::mono(samples, 48000)
    }

    fn ctx() -> NodeContext {
        NodeContext::new(48000.0, 1, 0)
    }

    #[test]
    fn test_high_pass_removes_rumble() {
        let mut filter = PassFilter::high_pass(ctx(), 500.0);
        let mut block = sine(30.0, 48000);
        filter.process(&mut block).unwrap();
        let tail_peak = crate::engine::buffer::peak_linear(&block.channel(0)[24000..]);
        assert!(tail_peak < 0.01, "rumble peak {}", tail_peak);
    }

    #[test]
    fn test_low_pass_keeps_voice_band() {
        let mut filter = PassFilter::low_pass(ctx(), 8000.0);
        let mut block = sine(300.0, 48000);
        filter.process(&mut block).unwrap();
        let tail_peak = crate::engine::buffer::peak_linear(&block.channel(0)[24000..]);
        assert!((tail_peak - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_set_params_clamps_and_toggles() {
        let mut filter = PassFilter::high_pass(ctx(), 100.0);
        let patch = SettingsPatch {
            highpass_freq: Some(9000.0),
            lowpass_freq: Some(50.0),
            ..SettingsPatch::default()
        };
        filter.set_params(&patch).unwrap();
        assert_eq!(filter.frequency(), 2000.0);

        filter
            .set_params(&SettingsPatch {
                enable_highpass: Some(false),
                ..SettingsPatch::default()
            })
            .unwrap();
        let mut block = sine(30.0, 256);
        let original = block.clone();
        filter.process(&mut block).unwrap();
        assert_eq!(block, original);
    }

    #[test]
    fn test_dispose_twice_is_safe() {
        let mut filter = PassFilter::low_pass(ctx(), 1000.0);
        filter.dispose();
        filter.dispose();
    }
}
