//! voxform - Voice Transformation Engine
//!
//! voxform turns a decoded voice recording into a transformed one through a
//! fixed chain of DSP stages (filters, noise reduction, adaptive voice
//! enhancement, distortion, dynamics, delay, reverb, mastering and a safety
//! limiter).
//!
//! # Architecture
//!
//! The same graph builder serves two contexts:
//! - Preview: block-by-block pull with smoothed parameter changes and a meter
//! - Offline: whole-buffer render with latency compensation
//!
//! Around the graph sit the voice profile analyzer, the quality analyzer,
//! the offline task queue and the preset library.

pub mod analysis;
pub mod cli;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod presets;

pub use analysis::{QualityAnalyzer, QualityReport, VoiceAnalyzer, VoiceProfile, VoiceType};
pub use engine::{
    render_offline, EffectSettings, OfflineRenderer, SampleBuffer, SettingsPatch, TaskQueue,
    VoiceEngine,
};
pub use error::{Result, VoxError};
pub use presets::{Preset, PresetLibrary};
