//! Distortion
//!
//! Static waveshaper: `(π + k)·x / (π + k·|x|)` with `k = amount × 100`.
//! At amount 0 the curve is the identity.

use std::f32::consts::PI;

use crate::dsp::node::{NodeContext, ProcessingNode, SmoothedParam, StageKind};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{SettingsPatch, UNIT_RANGE};
use crate::error::Result;

/// Drive multiplier applied to the 0..1 amount
const DRIVE_SCALE: f32 = 100.0;

/// Waveshaping curve for drive `k`
///
/// Odd-symmetric, passes through the origin and maps ±1 to ±1 for every k.
#[inline]
pub fn waveshape(x: f32, k: f32) -> f32 {
    (PI + k) * x / (PI + k * x.abs())
}

/// Waveshaping distortion stage
#[derive(Debug, Clone)]
pub struct Distortion {
    ctx: NodeContext,
    drive: SmoothedParam,
    bypassed: bool,
}

impl Distortion {
    pub fn new(ctx: NodeContext, amount: f32) -> Self {
        Self {
            ctx,
            drive: SmoothedParam::new(UNIT_RANGE.clamp(amount, 0.0) * DRIVE_SCALE),
            bypassed: false,
        }
    }

    /// Current amount in 0..=1
    pub fn amount(&self) -> f32 {
        self.drive.target() / DRIVE_SCALE
    }
}

impl ProcessingNode for Distortion {
    fn kind(&self) -> StageKind {
        StageKind::Distortion
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.bypassed {
            return Ok(());
        }
        for i in 0..block.len() {
            let k = self.drive.next_value();
            for ch in block.samples.iter_mut() {
                ch[i] = waveshape(ch[i], k);
            }
        }
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        if let Some(amount) = patch.distortion {
            let amount = UNIT_RANGE.clamp(amount, self.amount());
            self.drive
                .set_target(amount * DRIVE_SCALE, self.ctx.ramp_samples);
        }
        if let Some(enabled) = patch.enable_distortion {
            self.bypassed = !enabled;
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn dispose(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_curve_shape() {
        assert_eq!(waveshape(0.0, 40.0), 0.0);
        assert_relative_eq!(waveshape(1.0, 40.0), 1.0);
        assert_relative_eq!(waveshape(-1.0, 40.0), -1.0);
        assert_relative_eq!(waveshape(0.3, 0.0), 0.3);
        // Drive pushes small signals up
        assert!(waveshape(0.1, 40.0) > 0.5);
    }

    #[test]
    fn test_zero_amount_is_transparent() {
        let mut dist = Distortion::new(NodeContext::new(48000.0, 1, 0), 0.0);
        let mut block = SampleBuffer::mono(vec![0.1, -0.4, 0.7], 48000);
        dist.process(&mut block).unwrap();
        for (out, expected) in block.channel(0).iter().zip([0.1, -0.4, 0.7]) {
            assert_relative_eq!(*out, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_disable_bypasses() {
        let mut dist = Distortion::new(NodeContext::new(48000.0, 1, 0), 0.8);
        dist.set_params(&SettingsPatch {
            enable_distortion: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();
        let mut block = SampleBuffer::mono(vec![0.1, 0.2], 48000);
        let original = block.clone();
        dist.process(&mut block).unwrap();
        assert_eq!(block, original);
    }
}
