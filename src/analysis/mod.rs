//! Signal Analysis
//!
//! Stateless analysis passes: spectrum estimation, voice profiling and
//! rendered-output quality checks.

pub mod quality;
pub mod spectrum;
pub mod voice;

pub use quality::{QualityAnalyzer, QualityMetrics, QualityReport, TestResult, TestStatus};
pub use spectrum::{DftBackend, Spectrum, SpectrumAnalyzer, SpectrumBackend};
pub use voice::{classify_voice, VoiceAnalyzer, VoiceMetrics, VoiceProfile, VoiceType};

#[cfg(feature = "fft")]
pub use spectrum::FftBackend;
