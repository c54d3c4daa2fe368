//! Delay
//!
//! Feedback delay with a damped feedback path. Delay time, feedback and
//! wet level ramp smoothly when changed so live edits do not click.

use crate::dsp::biquad::OnePole;
use crate::dsp::node::{NodeContext, ProcessingNode, SmoothedParam, StageKind};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{SettingsPatch, DELAY_TIME_RANGE, UNIT_RANGE};
use crate::error::Result;

/// Feedback never reaches 1.0 so repeats always decay
pub const MAX_FEEDBACK: f32 = 0.95;

/// Level of the delayed signal when the stage is enabled
pub const WET_LEVEL: f32 = 0.5;

/// Dry signal level
pub const DRY_LEVEL: f32 = 1.0;

/// Corner of the lowpass in the feedback path
const FEEDBACK_DAMPING_HZ: f64 = 8000.0;

/// Feedback delay stage
#[derive(Debug, Clone)]
pub struct Delay {
    ctx: NodeContext,
    /// Delay time in seconds
    delay_time: SmoothedParam,
    feedback: SmoothedParam,
    wet: SmoothedParam,
    /// One circular buffer per channel
    lines: Vec<Vec<f32>>,
    dampers: Vec<OnePole>,
    write_pos: usize,
}

impl Delay {
    pub fn new(ctx: NodeContext, delay_time: f32, feedback: f32) -> Self {
        // One extra second of headroom covers the maximum delay time
        let capacity = (ctx.sample_rate * DELAY_TIME_RANGE.max as f64).ceil() as usize + 2;
        Self {
            ctx,
            delay_time: SmoothedParam::new(DELAY_TIME_RANGE.clamp(delay_time, 0.2)),
            feedback: SmoothedParam::new(Self::clamp_feedback(feedback)),
            wet: SmoothedParam::new(WET_LEVEL),
            lines: vec![vec![0.0; capacity]; ctx.channels],
            dampers: vec![OnePole::new(FEEDBACK_DAMPING_HZ, ctx.sample_rate); ctx.channels],
            write_pos: 0,
        }
    }

    fn clamp_feedback(feedback: f32) -> f32 {
        UNIT_RANGE.clamp(feedback, 0.3).min(MAX_FEEDBACK)
    }

    pub fn delay_time(&self) -> f32 {
        self.delay_time.target()
    }

    pub fn feedback(&self) -> f32 {
        self.feedback.target()
    }

    pub fn wet_level(&self) -> f32 {
        self.wet.target()
    }

    /// Linear-interpolated read `delay` samples behind the write head
    #[inline]
    fn read(line: &[f32], write_pos: usize, delay: f64) -> f32 {
        let len = line.len();
        let delay = delay.clamp(1.0, (len - 2) as f64);
        let whole = delay.floor() as usize;
        let frac = (delay - whole as f64) as f32;
        let a = line[(write_pos + len - whole) % len];
        let b = line[(write_pos + len - whole - 1) % len];
        a + (b - a) * frac
    }
}

impl ProcessingNode for Delay {
    fn kind(&self) -> StageKind {
        StageKind::Delay
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        if self.lines.len() < block.num_channels() {
            let capacity = self.lines.first().map(Vec::len).unwrap_or(
                (self.ctx.sample_rate * DELAY_TIME_RANGE.max as f64).ceil() as usize + 2,
            );
            self.lines.resize(block.num_channels(), vec![0.0; capacity]);
            self.dampers.resize(
                block.num_channels(),
                OnePole::new(FEEDBACK_DAMPING_HZ, self.ctx.sample_rate),
            );
        }

        let frames = block.len();
        let mut write_pos = self.write_pos;
        for i in 0..frames {
            let delay_samples = self.delay_time.next_value() as f64 * self.ctx.sample_rate;
            let feedback = self.feedback.next_value();
            let wet = self.wet.next_value();

            for (ch, samples) in block.samples.iter_mut().enumerate() {
                let line = &mut self.lines[ch];
                let input = samples[i];
                let delayed = Self::read(line, write_pos, delay_samples);
                let damped = self.dampers[ch].process((delayed * feedback) as f64) as f32;
                line[write_pos] = input + damped;
                samples[i] = input * DRY_LEVEL + delayed * wet;
            }

            write_pos = (write_pos + 1) % self.lines.first().map(Vec::len).unwrap_or(1).max(1);
        }
        self.write_pos = write_pos;
        Ok(())
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        let ramp = self.ctx.ramp_samples;
        if let Some(time) = patch.delay_time {
            self.delay_time
                .set_target(DELAY_TIME_RANGE.clamp(time, self.delay_time()), ramp);
        }
        if let Some(feedback) = patch.delay_feedback {
            self.feedback.set_target(Self::clamp_feedback(feedback), ramp);
        }
        if let Some(enabled) = patch.enable_delay {
            self.wet
                .set_target(if enabled { WET_LEVEL } else { 0.0 }, ramp);
        }
        Ok(())
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.iter_mut().for_each(|s| *s = 0.0);
        }
        for damper in &mut self.dampers {
            damper.reset();
        }
        self.write_pos = 0;
    }

    fn dispose(&mut self) {
        self.lines = Vec::new();
        self.dampers = Vec::new();
        self.write_pos = 0;
    }
}
