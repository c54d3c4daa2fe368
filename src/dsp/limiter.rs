//! Safety Limiter
//!
//! Brickwall limiter at the end of every chain. Keeps the output under a
//! fixed ceiling; signals already below it pass through untouched.

use crate::dsp::node::{time_to_coeff, NodeContext, ProcessingNode, StageKind};
use crate::engine::buffer::{db_to_linear, linear_to_db, SampleBuffer};
use crate::engine::settings::SettingsPatch;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Output ceiling in dBFS
pub const SAFETY_CEILING_DB: f32 = -1.0;

/// Very fast attack time for brickwall limiting (0.1ms)
const ATTACK_MS: f32 = 0.1;

/// Release time for gain recovery
const RELEASE_MS: f32 = 10.0;

/// Minimum ceiling in dB
const MIN_CEILING_DB: f32 = -12.0;
/// Maximum ceiling in dB
const MAX_CEILING_DB: f32 = 0.0;

// ============================================================================
// Limiter Stage
// ============================================================================

/// Always-present brickwall limiter
///
/// Gain reduction is tracked as a dB envelope with near-instant attack and
/// a short release; a final hard clip guarantees the ceiling.
#[derive(Debug, Clone)]
pub struct SafetyLimiter {
    ceiling_db: f32,
    ceiling_linear: f32,
    release_ms: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Gain reduction in dB (>= 0)
    envelope: f32,
}

impl SafetyLimiter {
    pub fn new(ctx: NodeContext) -> Self {
        Self::with_ceiling(ctx, SAFETY_CEILING_DB)
    }

    pub fn with_ceiling(ctx: NodeContext, ceiling_db: f32) -> Self {
        let ceiling_db = ceiling_db.clamp(MIN_CEILING_DB, MAX_CEILING_DB);
        Self {
            ceiling_db,
            ceiling_linear: db_to_linear(ceiling_db),
            release_ms: RELEASE_MS,
            attack_coeff: time_to_coeff(ATTACK_MS, ctx.sample_rate),
            release_coeff: time_to_coeff(RELEASE_MS, ctx.sample_rate),
            envelope: 0.0,
        }
    }

    pub fn ceiling_db(&self) -> f32 {
        self.ceiling_db
    }

    pub fn ceiling_linear(&self) -> f32 {
        self.ceiling_linear
    }

    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }
}

impl ProcessingNode for SafetyLimiter {
    fn kind(&self) -> StageKind {
        StageKind::Limiter
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        let frames = block.len();

        for i in 0..frames {
            let peak = block
                .samples
                .iter()
                .map(|ch| ch[i].abs())
                .fold(0.0_f32, f32::max);

            let target = if peak > self.ceiling_linear {
                (linear_to_db(peak) - self.ceiling_db).max(0.0)
            } else {
                0.0
            };

            let coeff = if target > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * target;

            if self.envelope == 0.0 && peak <= self.ceiling_linear {
                continue;
            }

            let gain = db_to_linear(-self.envelope);
            for ch in block.samples.iter_mut() {
                ch[i] *= gain;
                // Final hard clip so the ceiling is never exceeded
                if ch[i].abs() > self.ceiling_linear {
                    ch[i] = ch[i].signum() * self.ceiling_linear;
                }
            }
        }
        Ok(())
    }

    /// The safety limiter has fixed settings
    fn set_params(&mut self, _patch: &SettingsPatch) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn dispose(&mut self) {
        self.envelope = 0.0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NodeContext {
        NodeContext::new(48000.0, 2, 0)
    }

    fn constant(value: f32, frames: usize) -> SampleBuffer {
        SampleBuffer::from_channels(vec![vec![value; frames], vec![-value; frames]], 48000)
            .unwrap()
    }

    #[test]
    fn test_limiter_defaults() {
        let limiter = SafetyLimiter::new(ctx());
        assert_eq!(limiter.ceiling_db(), -1.0);
        assert_eq!(limiter.release_ms(), 10.0);
        assert!((limiter.ceiling_linear() - 0.891).abs() < 0.001);
    }

    #[test]
    fn test_limiter_below_ceiling_is_bit_identical() {
        let mut limiter = SafetyLimiter::new(ctx());
        let mut block = constant(0.5, 1024);
        let original = block.clone();
        limiter.process(&mut block).unwrap();
        assert_eq!(block, original);
    }

    #[test]
    fn test_limiter_brickwall() {
        let mut limiter = SafetyLimiter::new(ctx());
        let mut block = constant(1.5, 4096);
        limiter.process(&mut block).unwrap();
        let ceiling = limiter.ceiling_linear();
        for ch in &block.samples {
            for s in ch {
                assert!(s.abs() <= ceiling + 1e-6);
            }
        }
    }

    #[test]
    fn test_limiter_preserves_stereo_relationship() {
        let mut limiter = SafetyLimiter::new(ctx());
        let mut block = constant(1.2, 512);
        limiter.process(&mut block).unwrap();
        for i in 0..512 {
            assert_eq!(block.channel(0)[i], -block.channel(1)[i]);
        }
    }

    #[test]
    fn test_ceiling_clamped() {
        let limiter = SafetyLimiter::with_ceiling(ctx(), 6.0);
        assert_eq!(limiter.ceiling_db(), 0.0);
    }
}
