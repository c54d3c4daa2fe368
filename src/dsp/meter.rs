//! Metering Tap
//!
//! Preview-only tap at the end of the chain. Audio passes through untouched;
//! peak and RMS of the most recent block are published through a
//! [`MeterHandle`] that the UI side can poll.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::dsp::node::{ProcessingNode, StageKind};
use crate::engine::buffer::{linear_to_db, peak_linear, rms_linear, SampleBuffer, FLOOR_DB};
use crate::engine::settings::SettingsPatch;
use crate::error::Result;

/// Levels of the last block seen by the tap (linear)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MeterReading {
    pub peak: f32,
    pub rms: f32,
    /// Blocks observed since the tap was created
    pub blocks: u64,
}

impl MeterReading {
    pub fn peak_db(&self) -> f32 {
        linear_to_db(self.peak).max(FLOOR_DB)
    }

    pub fn rms_db(&self) -> f32 {
        linear_to_db(self.rms).max(FLOOR_DB)
    }
}

/// Shared read side of a meter tap
#[derive(Debug, Clone, Default)]
pub struct MeterHandle {
    reading: Arc<Mutex<MeterReading>>,
}

impl MeterHandle {
    fn lock(&self) -> MutexGuard<'_, MeterReading> {
        // A poisoned reading is still a valid pair of floats
        self.reading.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recent reading
    pub fn reading(&self) -> MeterReading {
        *self.lock()
    }
}

/// Pass-through node publishing block levels
#[derive(Debug, Default)]
pub struct MeterTap {
    handle: MeterHandle,
}

impl MeterTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MeterHandle {
        self.handle.clone()
    }
}

impl ProcessingNode for MeterTap {
    fn kind(&self) -> StageKind {
        StageKind::Meter
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        let peak = block
            .samples
            .iter()
            .map(|ch| peak_linear(ch))
            .fold(0.0_f32, f32::max);
        let rms = if block.num_channels() == 0 {
            0.0
        } else {
            let sum: f32 = block.samples.iter().map(|ch| rms_linear(ch).powi(2)).sum();
            (sum / block.num_channels() as f32).sqrt()
        };

        let mut reading = self.handle.lock();
        reading.peak = peak;
        reading.rms = rms;
        reading.blocks += 1;
        Ok(())
    }

    fn set_params(&mut self, _patch: &SettingsPatch) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        let mut reading = self.handle.lock();
        reading.peak = 0.0;
        reading.rms = 0.0;
    }

    fn dispose(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tap_reports_levels_and_passes_audio() {
        let mut tap = MeterTap::new();
        let handle = tap.handle();
        let mut block =
            SampleBuffer::from_channels(vec![vec![0.5, -0.5], vec![0.25, -0.25]], 48000).unwrap();
        let original = block.clone();
        tap.process(&mut block).unwrap();

        assert_eq!(block, original);
        let reading = handle.reading();
        assert_eq!(reading.peak, 0.5);
        assert_relative_eq!(reading.rms, (0.15625_f32).sqrt(), epsilon = 1e-6);
        assert_eq!(reading.blocks, 1);
        assert_relative_eq!(reading.peak_db(), -6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_silence_reads_floor() {
        let reading = MeterReading::default();
        assert_eq!(reading.peak_db(), FLOOR_DB);
    }
}
