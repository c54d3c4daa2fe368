//! Rendered Output Quality Checks
//!
//! [`QualityMetrics`] summarises a buffer with coarse level, distortion and
//! spectral figures. [`QualityAnalyzer::run_quality_checks`] runs a fixed
//! battery of ten named checks against an input and its rendered output and
//! folds them into a [`QualityReport`].
//!
//! The THD and loudness figures are approximations for regression tracking,
//! not standards-compliant measurements.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::spectrum::SpectrumAnalyzer;
use crate::engine::buffer::{
    calculate_clip_ratio, linear_to_db, peak_linear, rms_linear, SampleBuffer,
    CLIP_RATIO_THRESHOLD, FLOOR_DB, MIN_QUALITY_SAMPLE_RATE,
};
use crate::engine::core::OfflineRenderer;
use crate::engine::graph::{GraphBuilder, PreviewFactory, ResourceTracker};
use crate::engine::io::{decode_wav, WavEncoder};
use crate::engine::settings::EffectSettings;
use crate::error::Result;
use crate::presets::{PresetCategory, PresetLibrary};

// ============================================================================
// Constants
// ============================================================================

/// Window length for the THD estimate
const THD_WINDOW: usize = 1024;

/// Assumed noise floor behind the SNR figure
const ASSUMED_NOISE_FLOOR_DB: f32 = -60.0;

/// Offset from RMS to the loudness estimate
const LUFS_OFFSET_DB: f32 = 0.691;

/// Frequency splitting "low" and "high" for spectral balance
const BALANCE_SPLIT_HZ: f64 = 1000.0;

/// Minimum number of checks for a fully compliant report
pub const MIN_COMPLIANT_CHECKS: usize = 10;

/// Longest excerpt used by the smoke and benchmark checks
const EXCERPT_SECS: f64 = 1.0;

const BENCH_ITERATIONS: usize = 3;
const LEAK_ITERATIONS: usize = 5;

/// Processing-quality warning thresholds
const WARN_PEAK_DB: f32 = -0.1;
const WARN_DYNAMIC_RANGE_DB: f32 = 6.0;
const WARN_THD_PERCENT: f32 = 0.1;
const WARN_LUFS: f32 = -14.0;

/// Compliance criteria
const COMPLIANT_PEAK_DB: f32 = -0.1;
const COMPLIANT_THD_PERCENT: f32 = 0.05;
const COMPLIANT_DYNAMIC_RANGE_DB: f32 = 12.0;
const COMPLIANT_SNR_DB: f32 = 60.0;
const COMPLIANT_LUFS: f32 = -14.0;

// ============================================================================
// Metrics
// ============================================================================

/// Level, distortion and spectral summary of the first channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub peak_db: f32,
    pub rms_db: f32,
    /// Peak minus RMS
    pub dynamic_range_db: f32,
    /// Even-sample share of each window, as a percentage
    pub thd_percent: f32,
    pub snr_db: f32,
    /// Share of spectral energy above 1 kHz
    pub spectral_balance: f64,
    pub spectral_centroid_hz: f64,
    pub spectral_rolloff_hz: f64,
    pub lufs: f32,
    pub true_peak_db: f32,
}

impl QualityMetrics {
    pub fn compute(buffer: &SampleBuffer, spectrum: &SpectrumAnalyzer) -> Self {
        let samples: &[f32] = if buffer.num_channels() > 0 {
            buffer.channel(0)
        } else {
            &[]
        };

        let peak_db = level_db(peak_linear(samples));
        let rms_db = level_db(rms_linear(samples));
        let nyquist = buffer.sample_rate as f64 / 2.0;

        let (spectral_balance, spectral_centroid_hz, spectral_rolloff_hz) =
            match spectrum.analyze(samples, buffer.sample_rate) {
                Ok(s) => {
                    let total = s.total_power();
                    let balance = if total > 0.0 {
                        s.energy_between(BALANCE_SPLIT_HZ, nyquist) / total
                    } else {
                        0.5
                    };
                    (balance, s.centroid(), s.rolloff(0.85))
                }
                Err(err) => {
                    debug!(error = %err, "spectral metrics unavailable");
                    (0.5, nyquist * 0.3, nyquist * 0.8)
                }
            };

        Self {
            peak_db,
            rms_db,
            dynamic_range_db: peak_db - rms_db,
            thd_percent: estimate_thd(samples),
            snr_db: rms_db - ASSUMED_NOISE_FLOOR_DB,
            spectral_balance,
            spectral_centroid_hz,
            spectral_rolloff_hz,
            lufs: rms_db - LUFS_OFFSET_DB,
            true_peak_db: peak_db,
        }
    }
}

fn level_db(linear: f32) -> f32 {
    if linear > 0.0 {
        linear_to_db(linear).max(FLOOR_DB)
    } else {
        FLOOR_DB
    }
}

/// Mean even-index share of absolute sample mass per full window
///
/// Not a harmonic decomposition: a stable number for tracking regressions.
pub fn estimate_thd(samples: &[f32]) -> f32 {
    if samples.len() <= THD_WINDOW {
        return 0.0;
    }

    let mut ratio_sum = 0.0_f64;
    let mut start = 0;
    while start + THD_WINDOW < samples.len() {
        let window = &samples[start..start + THD_WINDOW];
        let total: f64 = window.iter().map(|s| s.abs() as f64).sum();
        let even: f64 = window.iter().step_by(2).map(|s| s.abs() as f64).sum();
        if total > 0.0 {
            ratio_sum += even / total;
        }
        start += THD_WINDOW;
    }

    let windows = samples.len() as f64 / THD_WINDOW as f64;
    ((ratio_sum / windows) * 100.0).min(100.0) as f32
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of one check; ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Warning,
    Fail,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Pass => "pass",
            TestStatus::Warning => "warning",
            TestStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub name: String,
    pub status: TestStatus,
    pub message: String,
}

impl TestResult {
    fn new(id: &str, name: &str, status: TestStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub tests: Vec<TestResult>,
    /// Worst individual status
    pub overall: TestStatus,
    pub fully_compliant: bool,
    /// Metrics of the rendered output, if rendering succeeded
    pub metrics: Option<QualityMetrics>,
    pub recommendations: Vec<String>,
    pub processing_time_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl QualityReport {
    fn from_tests(
        tests: Vec<TestResult>,
        metrics: Option<QualityMetrics>,
        processing_time_ms: u64,
    ) -> Self {
        let overall = tests
            .iter()
            .map(|t| t.status)
            .max()
            .unwrap_or(TestStatus::Pass);
        let fully_compliant = tests.len() >= MIN_COMPLIANT_CHECKS
            && tests.iter().all(|t| t.status == TestStatus::Pass);
        let recommendations = recommendations(&tests, metrics.as_ref());

        Self {
            tests,
            overall,
            fully_compliant,
            metrics,
            recommendations,
            processing_time_ms,
            generated_at: Utc::now(),
        }
    }

    pub fn test(&self, id: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.id == id)
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }
}

fn recommendations(tests: &[TestResult], metrics: Option<&QualityMetrics>) -> Vec<String> {
    let mut out = Vec::new();
    let failed = tests.iter().filter(|t| t.status == TestStatus::Fail).count();
    let warned = tests.iter().filter(|t| t.status == TestStatus::Warning).count();

    if failed > 0 {
        out.push(format!("Fix {} failed check(s) before release", failed));
    }
    if warned > 0 {
        out.push(format!("Review {} warning(s)", warned));
    }

    if let Some(m) = metrics {
        if m.peak_db > -0.3 {
            out.push("Lower the output ceiling or enable mastering to avoid clipping".into());
        }
        if m.dynamic_range_db < 10.0 {
            out.push("Reduce compression to recover dynamic range".into());
        }
        if m.thd_percent > WARN_THD_PERCENT {
            out.push("Reduce distortion amount".into());
        }
    }

    let slow = tests
        .iter()
        .any(|t| t.id == "performance-benchmark" && t.status == TestStatus::Warning);
    if slow {
        out.push("Use a smaller performance mode for faster rendering".into());
    }

    if !tests.is_empty() && failed == 0 && warned == 0 {
        out.push("All checks passed".into());
    }
    out
}

// ============================================================================
// Analyzer
// ============================================================================

/// Runs the quality check battery
#[derive(Debug, Default)]
pub struct QualityAnalyzer {
    renderer: OfflineRenderer,
    spectrum: SpectrumAnalyzer,
}

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self, buffer: &SampleBuffer) -> QualityMetrics {
        QualityMetrics::compute(buffer, &self.spectrum)
    }

    /// Run all ten checks in order
    ///
    /// Never fails: problems are reported as check results.
    pub fn run_quality_checks(
        &self,
        buffer: &SampleBuffer,
        settings: &EffectSettings,
        on_progress: &mut dyn FnMut(&str, f32),
    ) -> QualityReport {
        let started = Instant::now();
        let mut tests = Vec::with_capacity(MIN_COMPLIANT_CHECKS);

        on_progress("Checking buffer integrity", 0.1);
        tests.push(check_integrity(buffer));

        on_progress("Validating settings", 0.2);
        tests.push(check_settings(settings));

        on_progress("Testing engine core", 0.3);
        tests.push(self.check_engine_core(buffer, settings));

        on_progress("Analyzing processing quality", 0.4);
        let (quality, metrics) = self.check_processing_quality(buffer, settings);
        tests.push(quality);

        on_progress("Benchmarking performance", 0.5);
        tests.push(self.check_performance(buffer, settings));

        on_progress("Checking resource release", 0.6);
        tests.push(check_resource_leaks(self.renderer.builder(), buffer, settings));

        on_progress("Validating export path", 0.7);
        tests.push(self.check_export(buffer, settings));

        on_progress("Validating presets", 0.8);
        tests.push(check_presets());

        on_progress("Checking platform", 0.9);
        tests.push(self.check_platform());

        on_progress("Checking compliance", 0.95);
        tests.push(check_compliance(metrics.as_ref()));

        let elapsed = started.elapsed().as_millis() as u64;
        let report = QualityReport::from_tests(tests, metrics, elapsed);
        info!(
            overall = %report.overall,
            passed = report.count(TestStatus::Pass),
            elapsed_ms = elapsed,
            "quality checks finished"
        );
        on_progress("Quality checks complete", 1.0);
        report
    }

    fn render(&self, buffer: &SampleBuffer, settings: &EffectSettings) -> Result<SampleBuffer> {
        self.renderer.try_render(buffer, settings, &mut |_, _| {})
    }

    fn check_engine_core(&self, buffer: &SampleBuffer, settings: &EffectSettings) -> TestResult {
        const ID: &str = "engine-core";
        const NAME: &str = "Engine Core";

        let excerpt = excerpt(buffer);
        let started = Instant::now();
        match self.render(&excerpt, settings) {
            Ok(out) if out.is_empty() => {
                TestResult::new(ID, NAME, TestStatus::Fail, "Render returned an empty buffer")
            }
            Ok(out) if !out.is_finite() => {
                TestResult::new(ID, NAME, TestStatus::Fail, "Render produced non-finite samples")
            }
            Ok(_) => TestResult::new(
                ID,
                NAME,
                TestStatus::Pass,
                format!(
                    "Offline render completed in {}ms",
                    started.elapsed().as_millis()
                ),
            ),
            Err(err) => TestResult::new(
                ID,
                NAME,
                TestStatus::Fail,
                format!("Engine core check failed: {}", err),
            ),
        }
    }

    fn check_processing_quality(
        &self,
        buffer: &SampleBuffer,
        settings: &EffectSettings,
    ) -> (TestResult, Option<QualityMetrics>) {
        const ID: &str = "processing-quality";
        const NAME: &str = "Processing Quality";

        let rendered = match self.render(buffer, settings) {
            Ok(rendered) => rendered,
            Err(err) => {
                return (
                    TestResult::new(
                        ID,
                        NAME,
                        TestStatus::Fail,
                        format!("Quality analysis failed: {}", err),
                    ),
                    None,
                )
            }
        };
        let m = self.metrics(&rendered);

        let mut issues = Vec::new();
        if m.peak_db > WARN_PEAK_DB {
            issues.push(format!("possible clipping at {:.2} dB", m.peak_db));
        }
        if m.dynamic_range_db < WARN_DYNAMIC_RANGE_DB {
            issues.push(format!("low dynamic range {:.1} dB", m.dynamic_range_db));
        }
        if m.thd_percent > WARN_THD_PERCENT {
            issues.push(format!("THD estimate {:.3}%", m.thd_percent));
        }
        if m.lufs > WARN_LUFS {
            issues.push(format!("loudness {:.1} LUFS above {} LUFS", m.lufs, WARN_LUFS));
        }

        let result = if issues.is_empty() {
            TestResult::new(
                ID,
                NAME,
                TestStatus::Pass,
                format!(
                    "{:.1} dB dynamic range, {:.3}% THD",
                    m.dynamic_range_db, m.thd_percent
                ),
            )
        } else {
            TestResult::new(
                ID,
                NAME,
                TestStatus::Warning,
                format!("Quality issues: {}", issues.join("; ")),
            )
        };
        (result, Some(m))
    }

    fn check_performance(&self, buffer: &SampleBuffer, settings: &EffectSettings) -> TestResult {
        const ID: &str = "performance-benchmark";
        const NAME: &str = "Performance Benchmark";

        let excerpt = excerpt(buffer);
        let audio_secs = excerpt.duration_secs();
        if audio_secs <= 0.0 {
            return TestResult::new(ID, NAME, TestStatus::Fail, "Nothing to benchmark");
        }

        let mut total_secs = 0.0;
        for _ in 0..BENCH_ITERATIONS {
            let started = Instant::now();
            if let Err(err) = self.render(&excerpt, settings) {
                return TestResult::new(
                    ID,
                    NAME,
                    TestStatus::Fail,
                    format!("Benchmark render failed: {}", err),
                );
            }
            total_secs += started.elapsed().as_secs_f64();
        }

        let ratio = (total_secs / BENCH_ITERATIONS as f64) / audio_secs;
        let status = realtime_status(ratio);
        TestResult::new(ID, NAME, status, format!("{:.3}x realtime", ratio))
    }

    fn check_export(&self, buffer: &SampleBuffer, settings: &EffectSettings) -> TestResult {
        const ID: &str = "export-path";
        const NAME: &str = "Export Path";

        let result = self.render(&excerpt(buffer), settings).and_then(|rendered| {
            let encoder = WavEncoder::new(16)?;
            let bytes = encoder.encode(&rendered);
            let decoded = decode_wav(&bytes)?;
            Ok((rendered, bytes.len(), decoded))
        });

        match result {
            Ok((rendered, size, decoded)) => {
                let tolerance = 1.0 / 32767.0 + 1e-6;
                let same_shape = decoded.num_channels() == rendered.num_channels()
                    && decoded.len() == rendered.len();
                let max_error = rendered
                    .samples
                    .iter()
                    .zip(&decoded.samples)
                    .flat_map(|(a, b)| a.iter().zip(b))
                    .map(|(a, b)| (a.clamp(-1.0, 1.0) - b).abs())
                    .fold(0.0_f32, f32::max);

                if same_shape && max_error <= tolerance {
                    TestResult::new(
                        ID,
                        NAME,
                        TestStatus::Pass,
                        format!("16-bit WAV round trip OK ({} bytes)", size),
                    )
                } else {
                    TestResult::new(
                        ID,
                        NAME,
                        TestStatus::Fail,
                        format!("WAV round trip mismatch (max error {:.6})", max_error),
                    )
                }
            }
            Err(err) => TestResult::new(
                ID,
                NAME,
                TestStatus::Fail,
                format!("Export check failed: {}", err),
            ),
        }
    }

    fn check_platform(&self) -> TestResult {
        const ID: &str = "platform-capability";
        const NAME: &str = "Platform Capability";

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let backend = self.spectrum.backend_name();
        let message = format!("spectrum backend: {}, threads: {}", backend, threads);

        if backend == "dft" {
            TestResult::new(
                ID,
                NAME,
                TestStatus::Warning,
                format!("{} (FFT backend unavailable)", message),
            )
        } else {
            TestResult::new(ID, NAME, TestStatus::Pass, message)
        }
    }
}

/// First second of the buffer, or all of it when shorter
fn excerpt(buffer: &SampleBuffer) -> SampleBuffer {
    let frames = (buffer.sample_rate as f64 * EXCERPT_SECS) as usize;
    buffer.slice(0, frames.min(buffer.len()))
}

fn realtime_status(ratio: f64) -> TestStatus {
    if ratio < 1.0 {
        TestStatus::Pass
    } else if ratio < 5.0 {
        TestStatus::Warning
    } else {
        TestStatus::Fail
    }
}

fn check_integrity(buffer: &SampleBuffer) -> TestResult {
    const ID: &str = "buffer-integrity";
    const NAME: &str = "Buffer Integrity";

    if buffer.num_channels() == 0 || buffer.is_empty() {
        return TestResult::new(ID, NAME, TestStatus::Fail, "Buffer is empty");
    }

    let corrupted = buffer
        .samples
        .iter()
        .flat_map(|c| c.iter())
        .filter(|s| !s.is_finite() || s.abs() > 1.0)
        .count();
    if corrupted > 0 {
        return TestResult::new(
            ID,
            NAME,
            TestStatus::Fail,
            format!("{} corrupted sample(s)", corrupted),
        );
    }

    if buffer.sample_rate < MIN_QUALITY_SAMPLE_RATE {
        return TestResult::new(
            ID,
            NAME,
            TestStatus::Warning,
            format!(
                "Low sample rate {} Hz (recommended >= {} Hz)",
                buffer.sample_rate, MIN_QUALITY_SAMPLE_RATE
            ),
        );
    }

    let clip_ratio = calculate_clip_ratio(buffer);
    if clip_ratio >= CLIP_RATIO_THRESHOLD {
        return TestResult::new(
            ID,
            NAME,
            TestStatus::Warning,
            format!("{:.1}% of samples at full scale", clip_ratio * 100.0),
        );
    }

    TestResult::new(
        ID,
        NAME,
        TestStatus::Pass,
        format!(
            "{} frames, {} channel(s), {} Hz",
            buffer.len(),
            buffer.num_channels(),
            buffer.sample_rate
        ),
    )
}

fn check_settings(settings: &EffectSettings) -> TestResult {
    const ID: &str = "settings-validation";
    const NAME: &str = "Settings Validation";

    let issues = settings.validate();
    if issues.is_empty() {
        TestResult::new(ID, NAME, TestStatus::Pass, "All settings in range")
    } else {
        let joined: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
        TestResult::new(ID, NAME, TestStatus::Warning, joined.join("; "))
    }
}

fn check_resource_leaks(
    builder: &GraphBuilder,
    buffer: &SampleBuffer,
    settings: &EffectSettings,
) -> TestResult {
    const ID: &str = "resource-leak";
    const NAME: &str = "Resource Leak";

    let tracker = ResourceTracker::new();
    let factory = PreviewFactory::with_tracker(tracker.clone());
    let baseline = tracker.live_nodes();
    let probe = excerpt(buffer);

    for _ in 0..LEAK_ITERATIONS {
        match builder.build(&factory, &probe, settings) {
            Ok(mut graph) => graph.dispose(),
            Err(err) => {
                return TestResult::new(
                    ID,
                    NAME,
                    TestStatus::Warning,
                    format!("Leak check inconclusive: {}", err),
                )
            }
        }
    }

    let leaked = tracker.live_nodes().saturating_sub(baseline);
    if leaked == 0 {
        TestResult::new(
            ID,
            NAME,
            TestStatus::Pass,
            format!("{} graphs built and released", LEAK_ITERATIONS),
        )
    } else {
        warn!(leaked, "graph nodes still live after dispose");
        TestResult::new(
            ID,
            NAME,
            TestStatus::Fail,
            format!("{} node(s) still live after dispose", leaked),
        )
    }
}

fn check_presets() -> TestResult {
    const ID: &str = "preset-round-trip";
    const NAME: &str = "Preset Round Trip";

    let mut library = PresetLibrary::in_memory();
    let outcome = library
        .create(
            "Quality check",
            "Temporary preset",
            PresetCategory::Custom,
            EffectSettings::all_disabled(),
            &[],
        )
        .and_then(|created| {
            let loaded = library.get(&created.id)?;
            library.delete(&created.id)?;
            Ok(loaded.settings == created.settings)
        });

    match outcome {
        Ok(true) => TestResult::new(
            ID,
            NAME,
            TestStatus::Pass,
            "Create, load and delete succeeded",
        ),
        Ok(false) => TestResult::new(
            ID,
            NAME,
            TestStatus::Fail,
            "Loaded preset differs from the saved one",
        ),
        Err(err) => TestResult::new(
            ID,
            NAME,
            TestStatus::Fail,
            format!("Preset check failed: {}", err),
        ),
    }
}

fn check_compliance(metrics: Option<&QualityMetrics>) -> TestResult {
    const ID: &str = "aggregate-compliance";
    const NAME: &str = "Aggregate Compliance";

    let Some(m) = metrics else {
        return TestResult::new(ID, NAME, TestStatus::Fail, "No metrics available");
    };

    let criteria = [
        ("peak", m.peak_db <= COMPLIANT_PEAK_DB),
        ("THD", m.thd_percent <= COMPLIANT_THD_PERCENT),
        ("dynamic range", m.dynamic_range_db >= COMPLIANT_DYNAMIC_RANGE_DB),
        ("SNR", m.snr_db >= COMPLIANT_SNR_DB),
        ("loudness", m.lufs <= COMPLIANT_LUFS),
    ];
    let met = criteria.iter().filter(|(_, ok)| *ok).count();
    let percent = met * 100 / criteria.len();
    let violations: Vec<&str> = criteria
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(name, _)| *name)
        .collect();

    if percent == 100 {
        TestResult::new(ID, NAME, TestStatus::Pass, "All criteria met")
    } else {
        let status = if percent >= 80 {
            TestStatus::Warning
        } else {
            TestStatus::Fail
        };
        TestResult::new(
            ID,
            NAME,
            status,
            format!("{}% compliant (violations: {})", percent, violations.join(", ")),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
