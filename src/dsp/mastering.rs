//! Mastering Chain
//!
//! Composite stage wired as
//! `EQ → stereo enhancer → harmonic exciter → look-ahead limiter → master volume`.
//! Each sub-stage has its own config block and enable flag.
//!
//! The enhancement amount `a` feeds the chain as well:
//! - exciter amount = 0.4·a
//! - stereo width = 1 + 0.3·a
//! - high shelf gain = 2·a dB

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dsp::biquad::{Biquad, BiquadCoeffs, FilterKind};
use crate::dsp::compressor::{CompressorParams, Dynamics};
use crate::dsp::node::{NodeContext, ProcessingNode, SmoothedParam, StageKind};
use crate::engine::buffer::{db_to_linear, SampleBuffer};
use crate::engine::settings::{SettingsPatch, UNIT_RANGE};
use crate::error::Result;

// ============================================================================
// Configuration
// ============================================================================

/// Three-band tone shaping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqConfig {
    pub enabled: bool,
    /// dB, -12..=12
    pub low_gain_db: f32,
    /// dB, -12..=12
    pub mid_gain_db: f32,
    /// dB, -12..=12
    pub high_gain_db: f32,
    /// Low/mid crossover, 200..=1000 Hz
    pub low_freq: f32,
    /// Mid/high crossover, 2000..=8000 Hz
    pub high_freq: f32,
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_gain_db: 0.0,
            mid_gain_db: 0.0,
            high_gain_db: 0.0,
            low_freq: 300.0,
            high_freq: 3000.0,
        }
    }
}

impl EqConfig {
    /// The mid peak sits halfway between the crossovers
    pub fn mid_freq(&self) -> f32 {
        (self.low_freq + self.high_freq) / 2.0
    }
}

/// Mid/side width and bass mono
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StereoConfig {
    pub enabled: bool,
    /// 0 = mono, 1 = unchanged, 2 = double side level
    pub width: f32,
    /// Bass mono amount, 0..=1; crossover is `120 + 80·bass` Hz
    pub bass: f32,
    /// Left-channel micro delay amount, 0..=1 of 0.5 ms
    pub imaging: f32,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1.0,
            bass: 0.3,
            imaging: 0.2,
        }
    }
}

impl StereoConfig {
    pub fn bass_crossover_hz(&self) -> f64 {
        120.0 + self.bass as f64 * 80.0
    }

    pub fn imaging_delay_secs(&self) -> f64 {
        self.imaging as f64 * 0.0005
    }
}

/// High-frequency harmonic exciter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExciterConfig {
    pub enabled: bool,
    /// 0..=1
    pub amount: f32,
    /// High-pass corner feeding the shaper, 1000..=8000 Hz
    pub frequency: f32,
}

impl Default for ExciterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            amount: 0.3,
            frequency: 4000.0,
        }
    }
}

impl ExciterConfig {
    /// `(dry, wet)` gains
    pub fn mix(&self) -> (f32, f32) {
        if self.enabled {
            (1.0 - self.amount * 0.2, self.amount * 0.3)
        } else {
            (1.0, 0.0)
        }
    }
}

/// Final look-ahead limiter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterConfig {
    pub enabled: bool,
    /// dB, -6..=0
    pub threshold_db: f32,
    /// ms, 10..=1000
    pub release_ms: f32,
    /// dB, -1..=0
    pub ceiling_db: f32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_db: -1.0,
            release_ms: 100.0,
            ceiling_db: -0.3,
        }
    }
}

/// Full mastering configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasteringConfig {
    pub eq: EqConfig,
    pub stereo: StereoConfig,
    pub exciter: ExciterConfig,
    pub limiter: LimiterConfig,
    /// 0..=2
    pub master_volume: f32,
}

impl Default for MasteringConfig {
    fn default() -> Self {
        Self {
            eq: EqConfig::default(),
            stereo: StereoConfig::default(),
            exciter: ExciterConfig::default(),
            limiter: LimiterConfig::default(),
            master_volume: 1.0,
        }
    }
}

impl MasteringConfig {
    /// Stock configuration nudged by an enhancement amount
    pub fn for_enhancement(amount: f32) -> Self {
        let mut config = Self::default();
        config.apply_enhancement(amount);
        config
    }

    pub fn apply_enhancement(&mut self, amount: f32) {
        let amount = UNIT_RANGE.clamp(amount, 0.0);
        self.exciter.amount = amount * 0.4;
        self.stereo.width = 1.0 + amount * 0.3;
        self.eq.high_gain_db = amount * 2.0;
    }

    /// Toggle every sub-stage together
    pub fn set_enabled(&mut self, enabled: bool) {
        self.eq.enabled = enabled;
        self.stereo.enabled = enabled;
        self.exciter.enabled = enabled;
        self.limiter.enabled = enabled;
    }

    /// Force every field into range
    pub fn clamp(&mut self) {
        self.eq.low_gain_db = self.eq.low_gain_db.clamp(-12.0, 12.0);
        self.eq.mid_gain_db = self.eq.mid_gain_db.clamp(-12.0, 12.0);
        self.eq.high_gain_db = self.eq.high_gain_db.clamp(-12.0, 12.0);
        self.eq.low_freq = self.eq.low_freq.clamp(200.0, 1000.0);
        self.eq.high_freq = self.eq.high_freq.clamp(2000.0, 8000.0);
        self.stereo.width = self.stereo.width.clamp(0.0, 2.0);
        self.stereo.bass = self.stereo.bass.clamp(0.0, 1.0);
        self.stereo.imaging = self.stereo.imaging.clamp(0.0, 1.0);
        self.exciter.amount = self.exciter.amount.clamp(0.0, 1.0);
        self.exciter.frequency = self.exciter.frequency.clamp(1000.0, 8000.0);
        self.limiter.threshold_db = self.limiter.threshold_db.clamp(-6.0, 0.0);
        self.limiter.release_ms = self.limiter.release_ms.clamp(10.0, 1000.0);
        self.limiter.ceiling_db = self.limiter.ceiling_db.clamp(-1.0, 0.0);
        self.master_volume = self.master_volume.clamp(0.0, 2.0);
    }
}

/// Snapshot of the chain for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteringMetrics {
    pub eq_active: bool,
    pub stereo_width: f32,
    pub exciter_amount: f32,
    /// Current limiter gain reduction in dB (>= 0)
    pub limiter_reduction_db: f32,
    pub output_level: f32,
}

// ============================================================================
// Sub-stages
// ============================================================================

const SHELF_Q: f64 = 0.707;
const MID_Q: f64 = 1.0;

#[derive(Debug, Clone)]
struct MultibandEq {
    low: Biquad,
    mid: Biquad,
    high: Biquad,
}

impl MultibandEq {
    fn new(channels: usize) -> Self {
        Self {
            low: Biquad::new(BiquadCoeffs::identity(), channels),
            mid: Biquad::new(BiquadCoeffs::identity(), channels),
            high: Biquad::new(BiquadCoeffs::identity(), channels),
        }
    }

    fn configure(&mut self, config: &EqConfig, ctx: &NodeContext) {
        let sr = ctx.sample_rate;
        let top = ctx.max_frequency();
        self.low.set_coeffs(BiquadCoeffs::calculate(
            FilterKind::LowShelf,
            sr,
            (config.low_freq as f64).min(top),
            config.low_gain_db as f64,
            SHELF_Q,
        ));
        self.mid.set_coeffs(BiquadCoeffs::calculate(
            FilterKind::Peak,
            sr,
            (config.mid_freq() as f64).min(top),
            config.mid_gain_db as f64,
            MID_Q,
        ));
        self.high.set_coeffs(BiquadCoeffs::calculate(
            FilterKind::HighShelf,
            sr,
            (config.high_freq as f64).min(top),
            config.high_gain_db as f64,
            SHELF_Q,
        ));
    }

    fn process(&mut self, block: &mut SampleBuffer) {
        for (ch, samples) in block.channels_mut().enumerate() {
            self.low.process_channel(ch, samples);
            self.mid.process_channel(ch, samples);
            self.high.process_channel(ch, samples);
        }
    }

    fn reset(&mut self) {
        self.low.reset();
        self.mid.reset();
        self.high.reset();
    }
}

/// Mid/side width with bass mono and a left-channel imaging delay
#[derive(Debug, Clone)]
struct StereoEnhancer {
    side_lowpass: Biquad,
    /// Imaging delay line for the left channel
    line: Vec<f32>,
    write_pos: usize,
    delay_samples: f64,
}

impl StereoEnhancer {
    fn new(ctx: &NodeContext) -> Self {
        // 0.5 ms plus interpolation headroom
        let capacity = (ctx.sample_rate * 0.0005).ceil() as usize + 3;
        Self {
            side_lowpass: Biquad::new(BiquadCoeffs::identity(), 1),
            line: vec![0.0; capacity],
            write_pos: 0,
            delay_samples: 0.0,
        }
    }

    fn configure(&mut self, config: &StereoConfig, ctx: &NodeContext) {
        self.side_lowpass.set_coeffs(BiquadCoeffs::calculate(
            FilterKind::LowPass,
            ctx.sample_rate,
            config.bass_crossover_hz(),
            0.0,
            SHELF_Q,
        ));
        self.delay_samples = config.imaging_delay_secs() * ctx.sample_rate;
    }

    fn process(&mut self, block: &mut SampleBuffer, width: f32) {
        if block.num_channels() < 2 {
            return;
        }
        let len = self.line.len();
        let (left, rest) = block.samples.split_at_mut(1);
        let (left, right) = (&mut left[0], &mut rest[0]);

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mid = (*l + *r) * 0.5;
            let mut side = (*l - *r) * 0.5 * width;
            // Remove side content below the crossover so bass stays mono
            side -= self.side_lowpass.process_sample(0, side as f64) as f32;

            let new_left = mid + side;
            *r = mid - side;

            self.line[self.write_pos] = new_left;
            let whole = self.delay_samples.floor() as usize;
            let frac = (self.delay_samples - whole as f64) as f32;
            let a = self.line[(self.write_pos + len - whole) % len];
            let b = self.line[(self.write_pos + len - whole - 1) % len];
            *l = a + (b - a) * frac;
            self.write_pos = (self.write_pos + 1) % len;
        }
    }

    fn reset(&mut self) {
        self.side_lowpass.reset();
        self.line.fill(0.0);
        self.write_pos = 0;
    }
}

/// Exciter transfer curve, input clamped to [-1, 1]
#[inline]
pub fn exciter_curve(x: f32) -> f32 {
    let x = x.clamp(-1.0, 1.0);
    (x * 2.0).tanh() * 0.5 + (x * PI).sin() * 0.1
}

#[derive(Debug, Clone)]
struct HarmonicExciter {
    highpass: Biquad,
}

impl HarmonicExciter {
    fn new(channels: usize) -> Self {
        Self {
            highpass: Biquad::new(BiquadCoeffs::identity(), channels),
        }
    }

    fn configure(&mut self, config: &ExciterConfig, ctx: &NodeContext) {
        self.highpass.set_coeffs(BiquadCoeffs::calculate(
            FilterKind::HighPass,
            ctx.sample_rate,
            (config.frequency as f64).min(ctx.max_frequency()),
            0.0,
            SHELF_Q,
        ));
    }

    fn process(&mut self, block: &mut SampleBuffer, dry: f32, wet: f32) {
        for (ch, samples) in block.channels_mut().enumerate() {
            for s in samples.iter_mut() {
                let high = self.highpass.process_sample(ch, *s as f64) as f32;
                *s = *s * dry + exciter_curve(high) * wet;
            }
        }
    }

    fn reset(&mut self) {
        self.highpass.reset();
    }
}

/// Look-ahead time of the mastering limiter
pub const LOOKAHEAD_MS: f64 = 5.0;

/// Detector sees the input 5 ms before the gain is applied to it
#[derive(Debug, Clone)]
struct LookaheadLimiter {
    dynamics: Dynamics,
    lines: Vec<Vec<f32>>,
    write_pos: usize,
    lookahead: usize,
    ceiling_gain: f32,
    enabled: bool,
}

impl LookaheadLimiter {
    fn new(ctx: &NodeContext) -> Self {
        let lookahead = ((LOOKAHEAD_MS / 1000.0) * ctx.sample_rate).round() as usize;
        Self {
            dynamics: Dynamics::new(Self::params(&LimiterConfig::default()), ctx.sample_rate),
            lines: vec![vec![0.0; lookahead.max(1)]; ctx.channels],
            write_pos: 0,
            lookahead,
            ceiling_gain: 1.0,
            enabled: true,
        }
    }

    fn params(config: &LimiterConfig) -> CompressorParams {
        CompressorParams {
            threshold_db: config.threshold_db,
            knee_db: 0.0,
            ratio: 20.0,
            attack_ms: 1.0,
            release_ms: config.release_ms,
            makeup_gain_db: 0.0,
        }
    }

    fn configure(&mut self, config: &LimiterConfig) {
        self.dynamics.set_params(Self::params(config));
        self.ceiling_gain = db_to_linear(config.ceiling_db);
        self.enabled = config.enabled;
    }

    fn process(&mut self, block: &mut SampleBuffer) {
        if self.lines.len() < block.num_channels() {
            let len = self.lookahead.max(1);
            self.lines.resize(block.num_channels(), vec![0.0; len]);
        }

        for i in 0..block.len() {
            let detector = block
                .samples
                .iter()
                .map(|ch| ch[i].abs())
                .fold(0.0_f32, f32::max);
            let gain = if self.enabled {
                db_to_linear(self.dynamics.next_gain_db(detector)) * self.ceiling_gain
            } else {
                1.0
            };

            for (ch, samples) in block.samples.iter_mut().enumerate() {
                let delayed = if self.lookahead == 0 {
                    samples[i]
                } else {
                    let line = &mut self.lines[ch];
                    let out = line[self.write_pos];
                    line[self.write_pos] = samples[i];
                    out
                };
                samples[i] = delayed * gain;
            }
            if self.lookahead > 0 {
                self.write_pos = (self.write_pos + 1) % self.lookahead;
            }
        }
    }

    fn reset(&mut self) {
        self.dynamics.reset();
        self.lines.iter_mut().for_each(|line| line.fill(0.0));
        self.write_pos = 0;
    }
}

// ============================================================================
// Mastering Chain
// ============================================================================

/// Composite mastering stage
#[derive(Debug, Clone)]
pub struct MasteringChain {
    ctx: NodeContext,
    config: MasteringConfig,
    eq: MultibandEq,
    stereo: StereoEnhancer,
    exciter: HarmonicExciter,
    limiter: LookaheadLimiter,
    volume: SmoothedParam,
}

impl MasteringChain {
    pub fn new(ctx: NodeContext, enhancement: f32) -> Self {
        Self::with_config(ctx, MasteringConfig::for_enhancement(enhancement))
    }

    pub fn with_config(ctx: NodeContext, config: MasteringConfig) -> Self {
        let mut chain = Self {
            ctx,
            config,
            eq: MultibandEq::new(ctx.channels),
            stereo: StereoEnhancer::new(&ctx),
            exciter: HarmonicExciter::new(ctx.channels),
            limiter: LookaheadLimiter::new(&ctx),
            volume: SmoothedParam::new(1.0),
        };
        chain.apply_config();
        chain.volume = SmoothedParam::new(chain.config.master_volume);
        chain
    }

    pub fn config(&self) -> &MasteringConfig {
        &self.config
    }

    pub fn metrics(&self) -> MasteringMetrics {
        MasteringMetrics {
            eq_active: self.config.eq.enabled,
            stereo_width: self.config.stereo.width,
            exciter_amount: self.config.exciter.amount,
            limiter_reduction_db: -self.limiter.dynamics.reduction_db(),
            output_level: self.config.master_volume,
        }
    }

    fn apply_config(&mut self) {
        self.config.clamp();
        self.eq.configure(&self.config.eq, &self.ctx);
        self.stereo.configure(&self.config.stereo, &self.ctx);
        self.exciter.configure(&self.config.exciter, &self.ctx);
        self.limiter.configure(&self.config.limiter);
        self.volume
            .set_target(self.config.master_volume, self.ctx.ramp_samples);
        debug!(config = ?self.config, "mastering chain configured");
    }
}

impl ProcessingNode for MasteringChain {
    fn kind(&self) -> StageKind {
        StageKind::Mastering
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.config.eq.enabled {
            self.eq.process(block);
        }
        if self.config.stereo.enabled {
            self.stereo.process(block, self.config.stereo.width);
        }
        if self.config.exciter.enabled {
            let (dry, wet) = self.config.exciter.mix();
            self.exciter.process(block, dry, wet);
        }
        // Runs even when disabled so latency stays constant
        self.limiter.process(block);

        for i in 0..block.len() {
            let gain = self.volume.next_value();
            if gain == 1.0 {
                continue;
            }
            for ch in block.samples.iter_mut() {
                ch[i] *= gain;
            }
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        let before = self.config;
        if let Some(enabled) = patch.enable_mastering {
            self.config.set_enabled(enabled);
        }
        if let Some(amount) = patch.ai_enhancement {
            self.config.apply_enhancement(amount);
        }
        if self.config != before {
            self.apply_config();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.eq.reset();
        self.stereo.reset();
        self.exciter.reset();
        self.limiter.reset();
    }

    fn dispose(&mut self) {
        self.limiter.lines = Vec::new();
        self.stereo.line = vec![0.0; 1];
        self.stereo.write_pos = 0;
        self.reset();
    }

    fn latency_samples(&self) -> usize {
        self.limiter.lookahead
    }
}
