//! Audio codec and export collaborators
//!
//! Decoding goes through `hound` for files and in-memory bytes. Encoding for
//! export uses a canonical 44-byte PCM header (RIFF/WAVE/fmt/data), because
//! hound switches to `WAVE_FORMAT_EXTENSIBLE` for 24-bit output.
//!
//! Export preparation (normalize, fades, silence trim, resampling) runs on a
//! copy of the rendered buffer before encoding.

use std::io::{Cursor, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::buffer::{peak_linear, SampleBuffer};
use crate::error::{Result, VoxError};

/// Size of the canonical PCM header written by [`WavEncoder`]
pub const WAV_HEADER_LEN: usize = 44;

/// Peak level that `normalize` scales to
pub const NORMALIZE_PEAK: f32 = 0.97;

/// Samples at or below this magnitude count as silence when trimming
pub const TRIM_THRESHOLD: f32 = 0.01;

// ============================================================================
// Export Format
// ============================================================================

/// File export format for [`export_audio`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Target sample rate; the buffer is resampled when it differs
    pub sample_rate: u32,
    /// Bit depth: 16, 24 (integer) or 32 (float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat {
            sample_rate: 48000,
            bit_depth: 24,
        }
    }
}

impl ExportFormat {
    pub fn new(sample_rate: u32, bit_depth: u16) -> Self {
        ExportFormat {
            sample_rate,
            bit_depth,
        }
    }

    /// 44.1 kHz, 16-bit
    pub fn cd_quality() -> Self {
        ExportFormat::new(44100, 16)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode WAV container bytes into a buffer
pub fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| VoxError::InvalidAudio {
        reason: format!("failed to parse WAV data: {}", e),
        source: Some(Box::new(e)),
    })?;
    read_wav(reader)
}

/// Import a WAV file from disk
///
/// # Errors
/// * `Io` - If the file does not exist or cannot be opened
/// * `InvalidAudio` - If the file is not a valid WAV file
/// * `EmptyAudio` - If the file contains no frames
pub fn import_audio(path: &Path) -> Result<SampleBuffer> {
    if !path.exists() {
        return Err(VoxError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    let reader = WavReader::open(path).map_err(|e| VoxError::InvalidAudio {
        reason: format!("failed to open {}: {}", path.display(), e),
        source: Some(Box::new(e)),
    })?;
    read_wav(reader)
}

fn read_wav<R: Read>(reader: WavReader<R>) -> Result<SampleBuffer> {
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(VoxError::invalid_audio("WAV header declares zero channels"));
    }

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let buffer = SampleBuffer::from_interleaved(&interleaved, channels, spec.sample_rate)?;
    if buffer.is_empty() {
        return Err(VoxError::EmptyAudio);
    }
    Ok(buffer)
}

/// Integer PCM is scaled by `2^(bits-1) - 1` to mirror [`WavEncoder`]
fn read_samples_as_f32<R: Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let samples: std::result::Result<Vec<f32>, hound::Error> = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => reader.samples::<f32>().collect(),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect(),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32767.0))
            .collect(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388607.0))
            .collect(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect(),
        (SampleFormat::Int, bits) => {
            return Err(VoxError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits),
            })
        }
    };
    samples.map_err(|e| VoxError::InvalidAudio {
        reason: format!("failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    })
}

// ============================================================================
// Encoding
// ============================================================================

/// Canonical PCM WAV encoder (16- or 24-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavEncoder {
    bit_depth: u16,
}

impl WavEncoder {
    pub fn new(bit_depth: u16) -> Result<Self> {
        match bit_depth {
            16 | 24 => Ok(Self { bit_depth }),
            other => Err(VoxError::UnsupportedFormat {
                format: format!("{}-bit PCM export (only 16 and 24 supported)", other),
            }),
        }
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    /// Full scale value samples are multiplied by
    fn scale(&self) -> f32 {
        ((1_i32 << (self.bit_depth - 1)) - 1) as f32
    }

    /// Encode interleaved little-endian PCM with a 44-byte header
    pub fn encode(&self, buffer: &SampleBuffer) -> Vec<u8> {
        let channels = buffer.num_channels() as u16;
        let bytes_per_sample = (self.bit_depth / 8) as u32;
        let block_align = channels as u32 * bytes_per_sample;
        let byte_rate = buffer.sample_rate * block_align;
        let data_len = buffer.len() as u32 * block_align;

        let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16_u32.to_le_bytes());
        out.extend_from_slice(&1_u16.to_le_bytes()); // PCM
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&buffer.sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&(block_align as u16).to_le_bytes());
        out.extend_from_slice(&self.bit_depth.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());

        let scale = self.scale();
        for frame in 0..buffer.len() {
            for channel in &buffer.samples {
                let value = (channel[frame].clamp(-1.0, 1.0) * scale).round() as i32;
                let bytes = value.to_le_bytes();
                out.extend_from_slice(&bytes[..bytes_per_sample as usize]);
            }
        }
        out
    }
}

// ============================================================================
// File Export
// ============================================================================

/// Write a buffer to a WAV file through hound
pub fn export_audio(buffer: &SampleBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let data = if format.sample_rate != buffer.sample_rate {
        resample(buffer, format.sample_rate)
    } else {
        buffer.clone()
    };

    let spec = WavSpec {
        channels: data.num_channels() as u16,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let interleaved = data.to_interleaved();
    let mut writer = WavWriter::create(path, spec)?;
    match format.bit_depth {
        16 => {
            for sample in interleaved {
                writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
            }
        }
        24 => {
            for sample in interleaved {
                writer.write_sample((sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32)?;
            }
        }
        32 => {
            for sample in interleaved {
                writer.write_sample(sample)?;
            }
        }
        other => {
            return Err(VoxError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", other),
            })
        }
    }
    writer.finalize()?;
    Ok(())
}

// ============================================================================
// Export Preparation
// ============================================================================

/// Post-render processing applied before encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    /// 16 or 24
    pub bit_depth: u16,
    /// Resample to this rate when set
    pub sample_rate: Option<u32>,
    /// Scale so the peak sits at 0.97
    pub normalize: bool,
    /// Linear fade-in length
    pub fade_in_secs: f32,
    /// Linear fade-out length
    pub fade_out_secs: f32,
    /// Drop leading and trailing samples below 0.01
    pub trim_silence: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            bit_depth: 16,
            sample_rate: None,
            normalize: false,
            fade_in_secs: 0.0,
            fade_out_secs: 0.0,
            trim_silence: false,
        }
    }
}

/// Encoded export result
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedAudio {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`
    pub sha256: String,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub bit_depth: u16,
}

impl ExportedAudio {
    /// Write the encoded bytes to disk
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Apply normalize, fades, trim and resampling to a copy of `buffer`
pub fn prepare_for_export(buffer: &SampleBuffer, options: &ExportOptions) -> SampleBuffer {
    let mut out = buffer.clone();

    if options.normalize {
        normalize(&mut out);
    }
    if options.fade_in_secs > 0.0 || options.fade_out_secs > 0.0 {
        apply_fades(&mut out, options.fade_in_secs, options.fade_out_secs);
    }
    if options.trim_silence {
        out = trim_silence(&out);
    }
    match options.sample_rate {
        Some(rate) if rate != out.sample_rate && rate > 0 => resample(&out, rate),
        _ => out,
    }
}

/// Prepare and encode `buffer`, with a checksum of the result
pub fn export_bytes(buffer: &SampleBuffer, options: &ExportOptions) -> Result<ExportedAudio> {
    let encoder = WavEncoder::new(options.bit_depth)?;
    let prepared = prepare_for_export(buffer, options);
    let bytes = encoder.encode(&prepared);
    let sha256 = hex_digest(&bytes);

    Ok(ExportedAudio {
        bytes,
        sha256,
        duration_secs: prepared.duration_secs(),
        sample_rate: prepared.sample_rate,
        bit_depth: encoder.bit_depth(),
    })
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn normalize(buffer: &mut SampleBuffer) {
    let peak = buffer
        .samples
        .iter()
        .map(|ch| peak_linear(ch))
        .fold(0.0_f32, f32::max);
    if peak > 0.0 {
        buffer.scale(NORMALIZE_PEAK / peak);
    }
}

fn apply_fades(buffer: &mut SampleBuffer, fade_in_secs: f32, fade_out_secs: f32) {
    let sr = buffer.sample_rate as f32;
    let fade_in = (fade_in_secs.max(0.0) * sr) as usize;
    let fade_out = (fade_out_secs.max(0.0) * sr) as usize;
    let len = buffer.len();

    for channel in buffer.channels_mut() {
        for (i, sample) in channel.iter_mut().enumerate() {
            let mut gain = 1.0_f32;
            if i < fade_in {
                gain = i as f32 / fade_in as f32;
            }
            if fade_out > 0 && i + fade_out > len {
                gain = gain.min((len - i) as f32 / fade_out as f32);
            }
            *sample *= gain;
        }
    }
}

/// Drop leading and trailing frames where every channel is below the threshold
///
/// A buffer that is silent throughout is returned unchanged.
pub fn trim_silence(buffer: &SampleBuffer) -> SampleBuffer {
    let audible = |i: usize| buffer.samples.iter().any(|ch| ch[i].abs() > TRIM_THRESHOLD);
    let len = buffer.len();

    let Some(start) = (0..len).find(|&i| audible(i)) else {
        return buffer.clone();
    };
    let end = (0..len).rev().find(|&i| audible(i)).map_or(len, |i| i + 1);
    buffer.slice(start, end - start)
}

/// Linear-interpolation resampling to `target_rate`
pub fn resample(buffer: &SampleBuffer, target_rate: u32) -> SampleBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 {
        return buffer.clone();
    }
    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let new_len = (buffer.len() as u64 * target_rate as u64 / buffer.sample_rate as u64) as usize;

    let samples = buffer
        .samples
        .iter()
        .map(|input| {
            (0..new_len)
                .map(|i| {
                    let pos = i as f64 / ratio;
                    let index = pos.floor() as usize;
                    let frac = (pos - index as f64) as f32;
                    if index + 1 < input.len() {
                        input[index] * (1.0 - frac) + input[index + 1] * frac
                    } else {
                        input[index.min(input.len().saturating_sub(1))]
                    }
                })
                .collect()
        })
        .collect();

    SampleBuffer {
        samples,
        sample_rate: target_rate,
    }
}

// ============================================================================
// Test Signals
// ============================================================================

/// Mono sine wave
pub fn generate_test_tone(
    frequency: f32,
    amplitude: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> SampleBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let w = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    SampleBuffer::mono(
        (0..num_samples)
            .map(|i| amplitude * (w * i as f32).sin())
            .collect(),
        sample_rate,
    )
}

/// Harmonic-rich mono signal shaped like a sustained vowel
///
/// Sums the first `harmonics` multiples of `f0` with 1/k amplitude and adds
/// formant emphasis near 500 Hz and 1500 Hz.
pub fn generate_voice_like(f0: f32, duration_secs: f32, sample_rate: u32) -> SampleBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let nyquist = sample_rate as f32 / 2.0;
    let harmonics: Vec<(f32, f32)> = (1..=20)
        .map(|k| (k as f32 * f0, k as f32))
        .take_while(|(freq, _)| *freq < nyquist)
        .map(|(freq, k)| {
            let formant =
                1.0 + 2.0 * (-((freq - 500.0) / 150.0).powi(2)).exp() + (-((freq - 1500.0) / 250.0).powi(2)).exp();
            (freq, formant / k)
        })
        .collect();
    let norm: f32 = harmonics.iter().map(|(_, a)| a).sum();

    let samples = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let sum: f32 = harmonics
                .iter()
                .map(|(freq, amp)| amp * (2.0 * std::f32::consts::PI * freq * t).sin())
                .sum();
            0.5 * sum / norm
        })
        .collect();
    SampleBuffer::mono(samples, sample_rate)
}

// ============================================================================
// Tests
// ============================================================================
