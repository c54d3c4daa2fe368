//! Compressor
//!
//! Feed-forward dynamics shared by the glue compressor, the static
//! enhancement fallback and the mastering limiter:
//! - Linked peak detection across channels
//! - Soft or hard knee
//! - Attack/release smoothing in the gain-reduction (dB) domain

use serde::{Deserialize, Serialize};

use crate::dsp::node::{time_to_coeff, NodeContext, ProcessingNode, StageKind};
use crate::engine::buffer::{db_to_linear, linear_to_db, SampleBuffer, FLOOR_DB};
use crate::engine::settings::SettingsPatch;
use crate::error::{Result, VoxError};

/// Compressor parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorParams {
    /// Threshold in dB (-100 to 0)
    pub threshold_db: f32,
    /// Knee width in dB (0 = hard knee, up to 40)
    pub knee_db: f32,
    /// Compression ratio (1:1 to 20:1)
    pub ratio: f32,
    /// Attack time in milliseconds
    pub attack_ms: f32,
    /// Release time in milliseconds
    pub release_ms: f32,
    /// Makeup gain in dB (0 to 24)
    pub makeup_gain_db: f32,
}

impl Default for CompressorParams {
    /// Glue compressor used on every chain
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 3.0,
            attack_ms: 3.0,
            release_ms: 250.0,
            makeup_gain_db: 0.0,
        }
    }
}

impl CompressorParams {
    /// Heavier setting used when adaptive enhancement is unavailable
    pub fn static_enhancement() -> Self {
        Self {
            ratio: 12.0,
            ..Self::default()
        }
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("threshold_db", self.threshold_db, -100.0, 0.0),
            ("knee_db", self.knee_db, 0.0, 40.0),
            ("ratio", self.ratio, 1.0, 20.0),
            ("attack_ms", self.attack_ms, 0.0, 1000.0),
            ("release_ms", self.release_ms, 1.0, 1000.0),
            ("makeup_gain_db", self.makeup_gain_db, 0.0, 24.0),
        ];
        for (param, value, min, max) in checks {
            if !(min..=max).contains(&value) {
                return Err(VoxError::InvalidParameter {
                    param: param.to_string(),
                    value: value.to_string(),
                    expected: format!("{} to {}", min, max),
                });
            }
        }
        Ok(())
    }

    /// Clamp all parameters to valid ranges
    pub fn clamp(&mut self) {
        self.threshold_db = self.threshold_db.clamp(-100.0, 0.0);
        self.knee_db = self.knee_db.clamp(0.0, 40.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack_ms = self.attack_ms.clamp(0.0, 1000.0);
        self.release_ms = self.release_ms.clamp(1.0, 1000.0);
        self.makeup_gain_db = self.makeup_gain_db.clamp(0.0, 24.0);
    }
}

/// Static gain computer: gain change in dB (zero or negative) for a level
pub fn gain_change_db(input_db: f32, threshold_db: f32, knee_db: f32, ratio: f32) -> f32 {
    let slope = 1.0 / ratio - 1.0;
    let over = input_db - threshold_db;

    if knee_db > 0.0 && 2.0 * over.abs() <= knee_db {
        // Quadratic interpolation across the knee
        let x = over + knee_db / 2.0;
        slope * x * x / (2.0 * knee_db)
    } else if over > 0.0 {
        slope * over
    } else {
        0.0
    }
}

/// Linked-detection dynamics processor with dB-domain smoothing
///
/// While the signal stays below the knee the gain reduction is exactly
/// zero and samples pass through bit-identical.
#[derive(Debug, Clone)]
pub struct Dynamics {
    params: CompressorParams,
    sample_rate: f64,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current smoothed gain reduction in dB (<= 0)
    reduction_db: f32,
}

impl Dynamics {
    pub fn new(params: CompressorParams, sample_rate: f64) -> Self {
        let mut params = params;
        params.clamp();
        let mut dynamics = Self {
            params,
            sample_rate,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            reduction_db: 0.0,
        };
        dynamics.update_coefficients();
        dynamics
    }

    pub fn params(&self) -> &CompressorParams {
        &self.params
    }

    pub fn set_params(&mut self, params: CompressorParams) {
        self.params = params;
        self.params.clamp();
        self.update_coefficients();
    }

    /// Current gain reduction in dB, for metering
    pub fn reduction_db(&self) -> f32 {
        self.reduction_db
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_to_coeff(self.params.attack_ms, self.sample_rate);
        self.release_coeff = time_to_coeff(self.params.release_ms, self.sample_rate);
    }

    /// Advance the envelope for one frame and return the gain in dB
    ///
    /// `detector` is the linked peak level of the frame (linear).
    #[inline]
    pub fn next_gain_db(&mut self, detector: f32) -> f32 {
        let input_db = if detector > 0.0 {
            linear_to_db(detector)
        } else {
            FLOOR_DB
        };
        let target = gain_change_db(
            input_db,
            self.params.threshold_db,
            self.params.knee_db,
            self.params.ratio,
        );
        let coeff = if target < self.reduction_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.reduction_db = coeff * self.reduction_db + (1.0 - coeff) * target;
        self.reduction_db + self.params.makeup_gain_db
    }

    /// Process a block in place with linked detection
    pub fn process(&mut self, block: &mut SampleBuffer) {
        let frames = block.len();
        for frame in 0..frames {
            let detector = block
                .samples
                .iter()
                .map(|ch| ch[frame].abs())
                .fold(0.0_f32, f32::max);
            let gain_db = self.next_gain_db(detector);
            if gain_db == 0.0 {
                continue;
            }
            let gain = db_to_linear(gain_db);
            for ch in block.samples.iter_mut() {
                ch[frame] *= gain;
            }
        }
    }

    pub fn reset(&mut self) {
        self.reduction_db = 0.0;
    }
}

/// Always-present glue compressor stage
#[derive(Debug, Clone)]
pub struct Compressor {
    dynamics: Dynamics,
}

impl Compressor {
    pub fn new(ctx: NodeContext) -> Self {
        Self::with_params(ctx, CompressorParams::default())
    }

    pub fn with_params(ctx: NodeContext, params: CompressorParams) -> Self {
        Self {
            dynamics: Dynamics::new(params, ctx.sample_rate),
        }
    }

    pub fn params(&self) -> &CompressorParams {
        self.dynamics.params()
    }

    /// Get the current gain reduction in dB for metering
    pub fn gain_reduction_db(&self) -> f32 {
        self.dynamics.reduction_db()
    }
}

impl ProcessingNode for Compressor {
    fn kind(&self) -> StageKind {
        StageKind::Compressor
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        self.dynamics.process(block);
        Ok(())
    }

    /// The glue compressor has fixed settings
    fn set_params(&mut self, _patch: &SettingsPatch) -> Result<()> {
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
    use approx::assert_relative_eq;

    fn ctx() -> NodeContext {
        NodeContext::new(48000.0, 2, 0)
    }

    #[test]
    fn test_compressor_default_params() {
        let comp = Compressor::new(ctx());
        let params = comp.params();
        assert_eq!(params.threshold_db, -24.0);
        assert_eq!(params.knee_db, 30.0);
        assert_eq!(params.ratio, 3.0);
        assert_eq!(params.attack_ms, 3.0);
        assert_eq!(params.release_ms, 250.0);
    }

    #[test]
    fn test_parameter_validation() {
        let mut params = CompressorParams::default();
        assert!(params.validate().is_ok());

        params.ratio = 0.5;
        assert!(params.validate().is_err());
        params.ratio = 25.0;
        assert!(params.validate().is_err());
        params.clamp();
        assert_eq!(params.ratio, 20.0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_gain_computer() {
        // Hard knee
        assert_eq!(gain_change_db(-30.0, -20.0, 0.0, 4.0), 0.0);
        assert_relative_eq!(gain_change_db(-12.0, -20.0, 0.0, 4.0), -6.0);
        // Below the soft knee nothing happens
        assert_eq!(gain_change_db(-40.0, -24.0, 30.0, 3.0), 0.0);
        // Above the soft knee the full ratio applies
        assert_relative_eq!(gain_change_db(0.0, -24.0, 30.0, 3.0), -16.0, epsilon = 1e-4);
        // Inside the knee the reduction is gentler than the full ratio
        let in_knee = gain_change_db(-24.0, -24.0, 30.0, 3.0);
        assert!(in_knee < 0.0 && in_knee > -5.0);
    }

    #[test]
    fn test_quiet_signal_is_untouched() {
        let mut comp = Compressor::new(ctx());
        let samples: Vec<f32> = (0..4800).map(|i| (i as f32 * 0.05).sin() * 0.005).collect();
        let mut block = SampleBuffer::from_channels(vec![samples.clone(), samples], 48000).unwrap();
        let original = block.clone();
        comp.process(&mut block).unwrap();
        assert_eq!(block, original);
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = Compressor::new(ctx());
        let mut block = SampleBuffer::silence(2, 48000, 48000);
        for ch in block.channels_mut() {
            ch.iter_mut().for_each(|s| *s = 0.9);
        }
        comp.process(&mut block).unwrap();
        let tail = block.channel(0)[47999];
        assert!(tail < 0.2, "tail level {}", tail);
        assert!(comp.gain_reduction_db() < -10.0);
        // Channels stay linked
        assert_eq!(block.channel(0), block.channel(1));
    }
}
