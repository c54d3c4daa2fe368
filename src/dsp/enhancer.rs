//! Adaptive Voice Enhancement
//!
//! Four sub-processes tuned from a [`VoiceProfile`] and scaled from one
//! enhancement amount `a`:
//!
//! | Stage           | Amount  | Filter                                 | Gain       |
//! |-----------------|---------|----------------------------------------|------------|
//! | Clarity         | a       | one-pole high shelf at 1.5 × centroid  | 1 + 0.5·x  |
//! | Presence        | 0.7·a   | RBJ peak at formant 2, Q 2             | 1 + 0.3·x  |
//! | Warmth          | 0.4·a   | one-pole low shelf at 2 × f0           | 1 + 0.4·x  |
//! | Intelligibility | 1.1·a   | high shelves at 1, 2 and 4 kHz         | 1 + 0.2/0.3/0.4·x |
//!
//! Without a profile the fallbacks are 3000 Hz, 2500 Hz and 200 Hz.
//!
//! [`BasicEnhancer`] stands in when no profile could be extracted.

use crate::analysis::voice::VoiceProfile;
use crate::dsp::biquad::{Biquad, BiquadCoeffs, OnePole};
use crate::dsp::compressor::{CompressorParams, Dynamics};
use crate::dsp::node::{NodeContext, ProcessingNode, SmoothedParam, StageKind};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{SettingsPatch, UNIT_RANGE};
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

const FALLBACK_CLARITY_HZ: f64 = 3000.0;
const FALLBACK_PRESENCE_HZ: f64 = 2500.0;
const FALLBACK_WARMTH_HZ: f64 = 200.0;

const PRESENCE_Q: f64 = 2.0;

const INTELLIGIBILITY_BANDS: [(f64, f32); 3] = [(1000.0, 0.2), (2000.0, 0.3), (4000.0, 0.4)];

/// Sub-process amounts derived from the master amount
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancementAmounts {
    pub clarity: f32,
    pub presence: f32,
    pub warmth: f32,
    pub intelligibility: f32,
}

impl EnhancementAmounts {
    pub fn from_master(amount: f32) -> Self {
        Self {
            clarity: amount,
            presence: amount * 0.7,
            warmth: amount * 0.4,
            intelligibility: amount * 1.1,
        }
    }
}

// ============================================================================
// Shelving Sections
// ============================================================================

/// Unity-normalized one-pole shelf
///
/// `High`: y = x + (g - 1)·(x - lp(x)); `Low`: y = x + (g - 1)·lp(x).
#[derive(Debug, Clone)]
struct Shelf {
    high: bool,
    poles: Vec<OnePole>,
    frequency: f64,
    sample_rate: f64,
}

impl Shelf {
    fn new(high: bool, frequency: f64, ctx: &NodeContext) -> Self {
        let frequency = frequency.clamp(20.0, ctx.max_frequency());
        Self {
            high,
            poles: vec![OnePole::new(frequency, ctx.sample_rate); ctx.channels],
            frequency,
            sample_rate: ctx.sample_rate,
        }
    }

    #[inline]
    fn process(&mut self, channel: usize, x: f32, gain: f32) -> f32 {
        if channel >= self.poles.len() {
            self.poles
                .resize(channel + 1, OnePole::new(self.frequency, self.sample_rate));
        }
        let low = self.poles[channel].process(x as f64) as f32;
        let band = if self.high { x - low } else { low };
        x + (gain - 1.0) * band
    }

    fn reset(&mut self) {
        self.poles.iter_mut().for_each(OnePole::reset);
    }
}

// ============================================================================
// Adaptive Enhancer
// ============================================================================

/// Profile-driven four-stage enhancer
#[derive(Debug, Clone)]
pub struct AdaptiveEnhancer {
    ctx: NodeContext,
    profile: Option<VoiceProfile>,
    amount: SmoothedParam,
    clarity: Shelf,
    presence: Biquad,
    presence_freq: f64,
    presence_amount: f32,
    warmth: Shelf,
    intelligibility: Vec<Shelf>,
    bypassed: bool,
}

impl AdaptiveEnhancer {
    pub fn new(ctx: NodeContext, profile: Option<VoiceProfile>, amount: f32) -> Self {
        let amount = UNIT_RANGE.clamp(amount, 0.7);
        let clarity_freq = profile
            .as_ref()
            .filter(|p| p.spectral_centroid > 0.0)
            .map(|p| p.spectral_centroid * 1.5)
            .unwrap_or(FALLBACK_CLARITY_HZ);
        let presence_freq = profile
            .as_ref()
            .and_then(|p| p.formant(1))
            .filter(|f| *f > 0.0)
            .unwrap_or(FALLBACK_PRESENCE_HZ)
            .clamp(20.0, ctx.max_frequency());
        let warmth_freq = profile
            .as_ref()
            .filter(|p| p.fundamental_freq > 0.0)
            .map(|p| p.fundamental_freq * 2.0)
            .unwrap_or(FALLBACK_WARMTH_HZ);

        let mut enhancer = Self {
            ctx,
            profile,
            amount: SmoothedParam::new(amount),
            clarity: Shelf::new(true, clarity_freq, &ctx),
            presence: Biquad::new(BiquadCoeffs::identity(), ctx.channels),
            presence_freq,
            presence_amount: f32::NAN,
            warmth: Shelf::new(false, warmth_freq, &ctx),
            intelligibility: INTELLIGIBILITY_BANDS
                .iter()
                .map(|&(f, _)| Shelf::new(true, f, &ctx))
                .collect(),
            bypassed: false,
        };
        enhancer.update_presence(amount);
        enhancer
    }

    pub fn profile(&self) -> Option<&VoiceProfile> {
        self.profile.as_ref()
    }

    pub fn amount(&self) -> f32 {
        self.amount.target()
    }

    /// Corner frequencies: clarity, presence, warmth
    pub fn frequencies(&self) -> (f64, f64, f64) {
        (self.clarity.frequency, self.presence_freq, self.warmth.frequency)
    }

    fn update_presence(&mut self, amount: f32) {
        if amount == self.presence_amount {
            return;
        }
        let gain = 1.0 + 0.3 * EnhancementAmounts::from_master(amount).presence as f64;
        self.presence.set_coeffs(BiquadCoeffs::peaking_linear(
            self.ctx.sample_rate,
            self.presence_freq,
            PRESENCE_Q,
            gain,
        ));
        self.presence_amount = amount;
    }
}

impl ProcessingNode for AdaptiveEnhancer {
    fn kind(&self) -> StageKind {
        StageKind::VoiceEnhancement
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.bypassed {
            return Ok(());
        }
        // Peak coefficients follow the ramp once per block
        let block_amount = self.amount.value();
        self.update_presence(block_amount);

        for i in 0..block.len() {
            let amounts = EnhancementAmounts::from_master(self.amount.next_value());
            let clarity_gain = 1.0 + 0.5 * amounts.clarity;
            let warmth_gain = 1.0 + 0.4 * amounts.warmth;

            for (ch, samples) in block.samples.iter_mut().enumerate() {
                let mut x = samples[i];
                x = self.clarity.process(ch, x, clarity_gain);
                x = self.presence.process_sample(ch, x as f64) as f32;
                x = self.warmth.process(ch, x, warmth_gain);
                for (shelf, &(_, scale)) in
                    self.intelligibility.iter_mut().zip(&INTELLIGIBILITY_BANDS)
                {
                    x = shelf.process(ch, x, 1.0 + scale * amounts.intelligibility);
                }
                samples[i] = x;
            }
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        if let Some(amount) = patch.ai_enhancement {
            let amount = UNIT_RANGE.clamp(amount, self.amount());
            self.amount.set_target(amount, self.ctx.ramp_samples);
        }
        if let Some(enabled) = patch.enable_ai_enhancement {
            self.bypassed = !enabled;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.clarity.reset();
        self.presence.reset();
        self.warmth.reset();
        self.intelligibility.iter_mut().for_each(Shelf::reset);
    }

    fn dispose(&mut self) {
        self.presence.release();
        self.intelligibility = Vec::new();
        self.profile = None;
    }
}

// ============================================================================
// Static Fallback
// ============================================================================

/// Static enhancement used when voice analysis fails
///
/// Heavy compression followed by broadband gain `1 + 0.5 × amount`.
#[derive(Debug, Clone)]
pub struct BasicEnhancer {
    ctx: NodeContext,
    dynamics: Dynamics,
    gain: SmoothedParam,
    amount: f32,
    bypassed: bool,
}

impl BasicEnhancer {
    pub fn new(ctx: NodeContext, amount: f32) -> Self {
        let amount = UNIT_RANGE.clamp(amount, 0.7);
        Self {
            ctx,
            dynamics: Dynamics::new(CompressorParams::static_enhancement(), ctx.sample_rate),
            gain: SmoothedParam::new(1.0 + 0.5 * amount),
            amount,
            bypassed: false,
        }
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn gain(&self) -> f32 {
        self.gain.target()
    }
}

impl ProcessingNode for BasicEnhancer {
    fn kind(&self) -> StageKind {
        StageKind::VoiceEnhancement
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.bypassed {
            return Ok(());
        }
        self.dynamics.process(block);
        for i in 0..block.len() {
            let gain = self.gain.next_value();
            for ch in block.samples.iter_mut() {
                ch[i] *= gain;
            }
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        if let Some(amount) = patch.ai_enhancement {
            self.amount = UNIT_RANGE.clamp(amount, self.amount);
            self.gain
                .set_target(1.0 + 0.5 * self.amount, self.ctx.ramp_samples);
        }
        if let Some(enabled) = patch.enable_ai_enhancement {
            self.bypassed = !enabled;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.dynamics.reset();
    }

    fn dispose(&mut self) {
        self.dynamics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::voice::VoiceType;
    use crate::engine::buffer::rms_linear;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn ctx() -> NodeContext {
        NodeContext::new(48000.0, 1, 0)
    }

    fn tone(freq: f32, amp: f32) -> SampleBuffer {
        let samples = (0..48000)
            .map(|i| (2.0 * PI * freq * i as f32 / 48000.0).sin() * amp)
            .collect();
        SampleBuffer::mono(samples, 48000)
    }

    fn profile() -> VoiceProfile {
        VoiceProfile {
            fundamental_freq: 120.0,
            formants: vec![120.0, 2200.0, 360.0, 480.0],
            spectral_centroid: 1000.0,
            harmonic_ratio: 0.9,
            voice_type: VoiceType::Male,
        }
    }

    fn gain_at(node: &mut dyn ProcessingNode, freq: f32) -> f32 {
        let mut block = tone(freq, 0.1);
        let before = rms_linear(&block.channel(0)[24000..]);
        node.process(&mut block).unwrap();
        rms_linear(&block.channel(0)[24000..]) / before
    }

    #[test]
    fn test_amount_split() {
        let a = EnhancementAmounts::from_master(1.0);
        assert_eq!(a.clarity, 1.0);
        assert_relative_eq!(a.presence, 0.7);
        assert_relative_eq!(a.warmth, 0.4);
        assert_relative_eq!(a.intelligibility, 1.1);
    }

    #[test]
    fn test_frequencies_follow_profile() {
        let enhancer = AdaptiveEnhancer::new(ctx(), Some(profile()), 0.5);
        assert_eq!(enhancer.frequencies(), (1500.0, 2200.0, 240.0));

        let fallback = AdaptiveEnhancer::new(ctx(), None, 0.5);
        assert_eq!(fallback.frequencies(), (3000.0, 2500.0, 200.0));
    }

    #[test]
    fn test_zero_amount_is_near_transparent() {
        let mut enhancer = AdaptiveEnhancer::new(ctx(), Some(profile()), 0.0);
        for freq in [100.0, 1000.0, 8000.0] {
            assert_relative_eq!(gain_at(&mut enhancer, freq), 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_boost_is_bounded_and_tilted_up() {
        let mut low = AdaptiveEnhancer::new(ctx(), Some(profile()), 1.0);
        let mut high = AdaptiveEnhancer::new(ctx(), Some(profile()), 1.0);
        let low_gain = gain_at(&mut low, 60.0);
        let high_gain = gain_at(&mut high, 10000.0);
        // Warmth only: 1 + 0.4 * 0.4
        assert_relative_eq!(low_gain, 1.16, epsilon = 0.03);
        assert!(high_gain > low_gain);
        // Clarity and all three intelligibility shelves at most
        assert!(high_gain < 1.5 * 1.22 * 1.33 * 1.44 + 0.01);
    }

    #[test]
    fn test_basic_enhancer_gain() {
        let mut basic = BasicEnhancer::new(ctx(), 0.6);
        assert_relative_eq!(basic.gain(), 1.3);
        let mut block = tone(440.0, 0.001);
        basic.process(&mut block).unwrap();
        // Quiet input passes the compressor untouched, then gets the gain
        assert_relative_eq!(peak_of(&block), 0.0013, epsilon = 2e-5);
        assert_eq!(basic.kind(), StageKind::VoiceEnhancement);
    }

    fn peak_of(block: &SampleBuffer) -> f32 {
        crate::engine::buffer::peak_linear(block.channel(0))
    }

    #[test]
    fn test_disable_bypasses() {
        let mut enhancer = AdaptiveEnhancer::new(ctx(), None, 1.0);
        enhancer
            .set_params(&SettingsPatch {
                enable_ai_enhancement: Some(false),
                ..SettingsPatch::default()
            })
            .unwrap();
        let mut block = tone(3000.0, 0.2);
        let original = block.clone();
        enhancer.process(&mut block).unwrap();
        assert_eq!(block, original);
        enhancer.dispose();
        enhancer.dispose();
    }
}
