//! Reverb
//!
//! Freeverb-style room reverb:
//! - 8 parallel damped comb filters per channel
//! - 4 series allpass filters for diffusion
//! - Per-channel delay spread for decorrelation
//!
//! The mix setting crossfades dry (`1 - mix`) against wet (`mix`).

use crate::dsp::node::{NodeContext, ProcessingNode, SmoothedParam, StageKind};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{SettingsPatch, UNIT_RANGE};
use crate::error::Result;

// ============================================================================
// Freeverb Constants
// ============================================================================

/// Reference sample rate for Freeverb delays
const REFERENCE_SAMPLE_RATE: f64 = 44100.0;

/// Comb filter delays at 44100 Hz (8 filters)
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delays at 44100 Hz (4 filters)
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Delay offset added per channel index
const STEREO_SPREAD: usize = 23;

/// Fixed gain for allpass filters (standard Freeverb value)
const ALLPASS_GAIN: f32 = 0.5;

/// Input attenuation before the comb bank
const INPUT_GAIN: f32 = 0.015;

/// Wet output scaling
const WET_SCALE: f32 = 3.0;

/// Room size giving roughly a two second tail
const ROOM_SIZE: f32 = 0.75;

/// Damping: 0 bright, 1 dark
const DAMPING: f32 = 0.5;

const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

// ============================================================================
// Filter Building Blocks
// ============================================================================

/// Low-pass comb filter
///
/// y[n] = x[n - d] with a damped copy of the output fed back into the line.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
    feedback: f32,
    damp1: f32,
    damp2: f32,
}

impl CombFilter {
    fn new(delay: usize) -> Self {
        let damp = DAMPING * DAMP_SCALE;
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
            filter_state: 0.0,
            feedback: ROOM_SIZE * ROOM_SCALE + ROOM_OFFSET,
            damp1: 1.0 - damp,
            damp2: damp,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * self.damp1 + self.filter_state * self.damp2;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.pos = 0;
    }
}

/// Schroeder allpass used for diffusion
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - ALLPASS_GAIN * input;
        self.buffer[self.pos] = input + ALLPASS_GAIN * output;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Comb bank plus allpass chain for one channel
#[derive(Debug, Clone)]
struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(sample_rate: f64, channel: usize) -> Self {
        let scale = sample_rate / REFERENCE_SAMPLE_RATE;
        let spread = STEREO_SPREAD * channel;
        let scaled = |d: usize| (((d + spread) as f64 * scale) as usize).max(1);
        Self {
            combs: COMB_DELAYS.iter().map(|&d| CombFilter::new(scaled(d))).collect(),
            allpasses: ALLPASS_DELAYS
                .iter()
                .map(|&d| AllpassFilter::new(scaled(d)))
                .collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let input = input * INPUT_GAIN;
        let mut out: f32 = self.combs.iter_mut().map(|c| c.process(input)).sum();
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out * WET_SCALE
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

// ============================================================================
// Reverb Stage
// ============================================================================

/// Room reverb stage
#[derive(Debug, Clone)]
pub struct Reverb {
    ctx: NodeContext,
    /// Wet share; dry level is always `1 - mix`
    mix: SmoothedParam,
    enabled_mix: f32,
    enabled: bool,
    tanks: Vec<Tank>,
}

impl Reverb {
    pub fn new(ctx: NodeContext, mix: f32) -> Self {
        let mix = UNIT_RANGE.clamp(mix, 0.5);
        Self {
            ctx,
            mix: SmoothedParam::new(mix),
            enabled_mix: mix,
            enabled: true,
            tanks: (0..ctx.channels)
                .map(|ch| Tank::new(ctx.sample_rate, ch))
                .collect(),
        }
    }

    /// Current wet share
    pub fn mix(&self) -> f32 {
        self.mix.target()
    }
}

impl ProcessingNode for Reverb {
    fn kind(&self) -> StageKind {
        StageKind::Reverb
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        while self.tanks.len() < block.num_channels() {
            let ch = self.tanks.len();
            self.tanks.push(Tank::new(self.ctx.sample_rate, ch));
        }

        for i in 0..block.len() {
            let mix = self.mix.next_value();
            let dry = 1.0 - mix;
            for (ch, samples) in block.samples.iter_mut().enumerate() {
                let input = samples[i];
                let wet = self.tanks[ch].process(input);
                samples[i] = input * dry + wet * mix;
            }
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        if let Some(mix) = patch.reverb_mix {
            self.enabled_mix = UNIT_RANGE.clamp(mix, self.enabled_mix);
        }
        if let Some(enabled) = patch.enable_reverb {
            self.enabled = enabled;
        }
        let target = if self.enabled { self.enabled_mix } else { 0.0 };
        if target != self.mix.target() {
            self.mix.set_target(target, self.ctx.ramp_samples);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.tanks.iter_mut().for_each(Tank::clear);
    }

    fn dispose(&mut self) {
        self.tanks = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::rms_linear;

    fn ctx() -> NodeContext {
        NodeContext::new(44100.0, 2, 0)
    }

    fn impulse(frames: usize) -> SampleBuffer {
        let mut left = vec![0.0; frames];
        left[0] = 1.0;
        let right = left.clone();
        SampleBuffer::from_channels(vec![left, right], 44100).unwrap()
    }

    #[test]
    fn test_tail_follows_impulse() {
        let mut reverb = Reverb::new(ctx(), 1.0);
        let mut block = impulse(44100);
        reverb.process(&mut block).unwrap();
        let tail = &block.channel(0)[2000..22050];
        assert!(rms_linear(tail) > 1e-4);
        assert!(block.is_finite());
    }

    #[test]
    fn test_channels_decorrelated() {
        let mut reverb = Reverb::new(ctx(), 1.0);
        let mut block = impulse(8000);
        reverb.process(&mut block).unwrap();
        assert_ne!(block.channel(0), block.channel(1));
    }

    #[test]
    fn test_zero_mix_is_dry() {
        let mut reverb = Reverb::new(ctx(), 0.0);
        let mut block = impulse(4000);
        let original = block.clone();
        reverb.process(&mut block).unwrap();
        assert_eq!(block, original);
    }

    #[test]
    fn test_disable_then_enable_restores_mix() {
        let mut reverb = Reverb::new(ctx(), 0.4);
        reverb
            .set_params(&SettingsPatch {
                enable_reverb: Some(false),
                ..SettingsPatch::default()
            })
            .unwrap();
        assert_eq!(reverb.mix(), 0.0);
        reverb
            .set_params(&SettingsPatch {
                reverb_mix: Some(0.6),
                ..SettingsPatch::default()
            })
            .unwrap();
        assert_eq!(reverb.mix(), 0.0);
        reverb
            .set_params(&SettingsPatch {
                enable_reverb: Some(true),
                ..SettingsPatch::default()
            })
            .unwrap();
        assert!((reverb.mix() - 0.6).abs() < 1e-6);
    }
}
