//! Sample Buffer Management
//!
//! Provides the core multi-channel sample buffer used by every stage of the
//! pipeline, plus the level helpers shared by the analyzers.

use crate::error::{Result, VoxError};

// ============================================================================
// Constants
// ============================================================================

/// Sample rate used when a buffer is created without one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Lowest sample rate considered broadcast quality
pub const MIN_QUALITY_SAMPLE_RATE: u32 = 44100;

/// Maximum acceptable ratio of full-scale samples (1%)
pub const CLIP_RATIO_THRESHOLD: f32 = 0.01;

/// Level reported for silence instead of negative infinity
pub const FLOOR_DB: f32 = -120.0;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Absolute peak of a sample slice (linear)
pub fn peak_linear(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

/// RMS of a sample slice (linear)
pub fn rms_linear(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Calculate the RMS level of a buffer across all channels, in dB
///
/// Returns -f32::INFINITY for empty or silent buffers.
pub fn calculate_rms(buffer: &SampleBuffer) -> f32 {
    let total_samples = buffer.num_channels() * buffer.len();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

/// Calculate the peak level of a buffer across all channels, in dB
pub fn calculate_peak(buffer: &SampleBuffer) -> f32 {
    let peak = buffer
        .samples
        .iter()
        .map(|channel| peak_linear(channel))
        .fold(0.0_f32, f32::max);

    linear_to_db(peak)
}

/// Ratio of samples sitting at or above full scale
pub fn calculate_clip_ratio(buffer: &SampleBuffer) -> f32 {
    let total_samples = buffer.num_channels() * buffer.len();
    if total_samples == 0 {
        return 0.0;
    }

    let clipped_count = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .filter(|&&s| s.abs() >= 1.0)
        .count();

    clipped_count as f32 / total_samples as f32
}

// ============================================================================
// Sample Buffer
// ============================================================================

/// Decoded audio as one float array per channel plus a sample rate
///
/// All channels always hold the same number of samples. Stages either
/// mutate a buffer in place or produce a new one with matching channel
/// count, length and sample rate; only the source resampler changes length.
///
/// # Example
/// ```
/// use voxform::engine::buffer::SampleBuffer;
///
/// let buffer = SampleBuffer::silence(2, 48000, 48000);
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.len(), 48000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl SampleBuffer {
    /// Create a zeroed buffer
    pub fn silence(num_channels: usize, num_samples: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; num_channels],
            sample_rate,
        }
    }

    /// Create a buffer from per-channel sample arrays
    ///
    /// Fails if the channels have different lengths.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if let Some(first) = samples.first() {
            let expected = first.len();
            if let Some(bad) = samples.iter().position(|ch| ch.len() != expected) {
                return Err(VoxError::invalid_audio(format!(
                    "channel {} has {} samples, expected {}",
                    bad,
                    samples[bad].len(),
                    expected
                )));
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a mono buffer from one sample array
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: vec![samples],
            sample_rate,
        }
    }

    /// Create a buffer from interleaved sample data
    pub fn from_interleaved(
        interleaved: &[f32],
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(VoxError::invalid_audio("channel count must be at least 1"));
        }

        if interleaved.len() % num_channels != 0 {
            return Err(VoxError::invalid_audio(format!(
                "Interleaved data length {} is not divisible by channel count {}",
                interleaved.len(),
                num_channels
            )));
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.num_channels();
        let num_samples = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get mutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Iterate mutably over channels
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut Vec<f32>> {
        self.samples.iter_mut()
    }

    /// Check that the buffer can be fed through a graph
    pub fn ensure_processable(&self) -> Result<()> {
        if self.num_channels() == 0 {
            return Err(VoxError::invalid_audio("buffer has no channels"));
        }
        if self.sample_rate == 0 {
            return Err(VoxError::invalid_audio("sample rate is zero"));
        }
        if self.is_empty() {
            return Err(VoxError::EmptyAudio);
        }
        if self.samples.iter().any(|ch| ch.len() != self.len()) {
            return Err(VoxError::invalid_audio("channels have different lengths"));
        }
        Ok(())
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Copy `len` frames starting at `start` into a new buffer
    ///
    /// Frames past the end are dropped, so the result may be shorter.
    pub fn slice(&self, start: usize, len: usize) -> SampleBuffer {
        let end = (start + len).min(self.len());
        let start = start.min(end);
        SampleBuffer {
            samples: self
                .samples
                .iter()
                .map(|ch| ch[start..end].to_vec())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Append another buffer's frames (channel counts must match)
    pub fn append(&mut self, other: &SampleBuffer) -> Result<()> {
        if other.num_channels() != self.num_channels() {
            return Err(VoxError::invalid_audio(format!(
                "cannot append {} channels to a {}-channel buffer",
                other.num_channels(),
                self.num_channels()
            )));
        }
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            dst.extend_from_slice(src);
        }
        Ok(())
    }

    /// Drop the first `frames` frames of every channel
    pub fn drop_front(&mut self, frames: usize) {
        for ch in &mut self.samples {
            let n = frames.min(ch.len());
            ch.drain(..n);
        }
    }

    /// Shorten every channel to `frames`
    pub fn truncate(&mut self, frames: usize) {
        for ch in &mut self.samples {
            ch.truncate(frames);
        }
    }

    /// Clamp all samples to the valid range [-1.0, 1.0]
    pub fn clamp(&mut self) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
    }

    /// Multiply every sample by a linear gain
    pub fn scale(&mut self, gain: f32) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::silence(2, 0, DEFAULT_SAMPLE_RATE)
    }
}

// ============================================================================
// Tests
// ============================================================================
