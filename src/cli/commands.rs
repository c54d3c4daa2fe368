//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analysis::{QualityAnalyzer, QualityReport, TestStatus, VoiceAnalyzer, VoiceMetrics};
use crate::cli::SettingsSource;
use crate::engine::buffer::{calculate_peak, calculate_rms};
use crate::engine::core::OfflineRenderer;
use crate::engine::io::{export_bytes, import_audio, ExportOptions};
use crate::engine::settings::EffectSettings;
use crate::engine::tasks::{
    ProgressCallback, TaskKind, TaskOutput, TaskPayload, TaskPriority, TaskQueue,
};
use crate::error::{Result, VoxError};
use crate::presets::{
    JsonPresetStore, MemoryPresetStore, PresetCategory, PresetLibrary, PresetStore,
};

pub type Library = PresetLibrary<Box<dyn PresetStore>>;

/// Open the preset library in `dir`, or an in-memory one
pub fn open_library(dir: Option<&Path>) -> Result<Library> {
    let store: Box<dyn PresetStore> = match dir {
        Some(dir) => Box::new(JsonPresetStore::open(dir)?),
        None => Box::new(MemoryPresetStore::new()),
    };
    PresetLibrary::new(store)
}

/// Read effect settings from a JSON file
pub fn load_settings_file(path: &Path) -> Result<EffectSettings> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Settings from `--settings`, `--preset`, or the defaults
pub fn resolve_settings(source: &SettingsSource, library: &Library) -> Result<EffectSettings> {
    if let Some(path) = &source.settings {
        return load_settings_file(path);
    }
    if let Some(id) = &source.preset {
        return Ok(library.get(id)?.settings);
    }
    Ok(EffectSettings::default())
}

fn log_progress(stage: &str, fraction: f32) {
    debug!(stage, progress = format!("{:.0}%", fraction * 100.0), "progress");
}

/// Render one file and write it as WAV.
pub fn render(
    input: &Path,
    output: &Path,
    settings: &EffectSettings,
    options: &ExportOptions,
) -> Result<()> {
    info!("Rendering {} -> {}", input.display(), output.display());

    let buffer = import_audio(input)?;
    let rendered = OfflineRenderer::new().try_render(&buffer, settings, &mut log_progress)?;
    let exported = export_bytes(&rendered, options)?;
    exported.write_to(output)?;

    println!("Rendered: {}", output.display());
    println!(
        "  {:.2}s, {} Hz, {}-bit",
        exported.duration_secs, exported.sample_rate, exported.bit_depth
    );
    println!("  sha256: {}", exported.sha256);

    Ok(())
}

/// Print the voice profile of a file.
pub fn analyze(input: &Path, json: bool) -> Result<()> {
    info!("Analyzing voice: {}", input.display());

    let buffer = import_audio(input)?;
    let profile = VoiceAnalyzer::new().analyze(&buffer)?;
    let metrics = VoiceMetrics::measure(&buffer, 0.0);
    let (peak_db, rms_db) = (calculate_peak(&buffer), calculate_rms(&buffer));

    if json {
        let value = serde_json::json!({
            "profile": profile,
            "metrics": metrics,
            "levels": { "peakDb": peak_db, "rmsDb": rms_db },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Voice profile: {}", input.display());
    println!("  Type:              {}", profile.voice_type);
    println!("  Fundamental:       {:.1} Hz", profile.fundamental_freq);
    let formants: Vec<String> = profile
        .formants
        .iter()
        .map(|f| format!("{:.0}", f))
        .collect();
    println!("  Formants:          {} Hz", formants.join(", "));
    println!("  Spectral centroid: {:.0} Hz", profile.spectral_centroid);
    println!("  Harmonic ratio:    {:.2}", profile.harmonic_ratio);
    println!("  Voice activity:    {:.2}", metrics.voice_activity);
    println!("  Noise level:       {:.2}", metrics.noise_level);
    println!("  Peak level:        {:.1} dBFS", peak_db);
    println!("  RMS level:         {:.1} dBFS", rms_db);

    Ok(())
}

fn print_report(report: &QualityReport) {
    for test in &report.tests {
        let marker = match test.status {
            TestStatus::Pass => "PASS",
            TestStatus::Warning => "WARN",
            TestStatus::Fail => "FAIL",
        };
        println!("  [{}] {}: {}", marker, test.name, test.message);
    }
    println!("Overall: {}", report.overall);
    println!("Fully compliant: {}", report.fully_compliant);
    for recommendation in &report.recommendations {
        println!("  - {}", recommendation);
    }
}

/// Run the quality checks on a file.
pub fn qa(input: &Path, settings: &EffectSettings, json: bool) -> Result<()> {
    info!("Running quality checks: {}", input.display());

    let buffer = import_audio(input)?;
    let report = QualityAnalyzer::new().run_quality_checks(&buffer, settings, &mut log_progress);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Quality report: {}", input.display());
        print_report(&report);
    }

    Ok(())
}

/// WAV files under `dir`, sorted
pub fn find_wav_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        })
        .collect();
    files.sort();
    files
}

fn task_logger(name: String) -> ProgressCallback {
    Box::new(move |stage: &str, fraction: f32| {
        debug!(file = %name, stage, progress = fraction, "task progress");
    })
}

/// Render every WAV file under `input_dir` through the task queue.
pub fn batch(
    input_dir: &Path,
    output_dir: &Path,
    settings: &EffectSettings,
    quality: bool,
) -> Result<()> {
    let files = find_wav_files(input_dir);
    if files.is_empty() {
        println!("No WAV files found in {}", input_dir.display());
        return Ok(());
    }
    info!("Batch rendering {} file(s)", files.len());

    let mut queue = TaskQueue::new();
    let mut jobs = Vec::new();
    for path in &files {
        let buffer = match import_audio(path) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                continue;
            }
        };
        let relative = path.strip_prefix(input_dir).unwrap_or(path).to_path_buf();
        let label = relative.display().to_string();

        let export = queue.queue_task(
            TaskKind::Export,
            TaskPayload::Export {
                buffer: buffer.clone(),
                settings: settings.clone(),
                options: ExportOptions::default(),
            },
            TaskPriority::Normal,
            Some(task_logger(label.clone())),
        )?;
        let check = if quality {
            Some(queue.queue_task(
                TaskKind::QualityCheck,
                TaskPayload::QualityCheck {
                    buffer,
                    settings: settings.clone(),
                },
                TaskPriority::Low,
                Some(task_logger(label)),
            )?)
        } else {
            None
        };
        jobs.push((relative, export, check));
    }

    queue.run_until_idle();

    let mut written = 0;
    for (relative, export, check) in jobs {
        let destination = output_dir.join(&relative);
        match queue.take_output(&export) {
            Some(TaskOutput::Exported(audio)) => {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)?;
                }
                audio.write_to(&destination)?;
                written += 1;
                println!("Rendered: {}", destination.display());
            }
            _ => {
                let error = queue
                    .task_status(&export)
                    .and_then(|t| t.error.clone())
                    .unwrap_or_else(|| String::from("no output"));
                println!("Failed: {} ({})", relative.display(), error);
            }
        }

        if let Some(id) = check {
            if let Some(TaskOutput::Quality(report)) = queue.take_output(&id) {
                println!("  quality: {}", report.overall);
            }
        }
    }

    let stats = queue.stats();
    println!(
        "Batch complete: {} written, {} task(s) failed",
        written, stats.failed
    );

    Ok(())
}

/// List presets, optionally filtered.
pub fn list_presets(library: &Library, search: Option<&str>) -> Result<()> {
    let presets = match search {
        Some(query) => library.search(query)?,
        None => library.list()?,
    };

    for preset in presets {
        let marker = if preset.built_in { "*" } else { " " };
        println!(
            "{} {:<38} {:<24} {}",
            marker, preset.id, preset.name, preset.description
        );
    }
    Ok(())
}

/// Print one preset as JSON.
pub fn show_preset(library: &Library, id: &str) -> Result<()> {
    let preset = library.get(id)?;
    println!("{}", serde_json::to_string_pretty(&preset)?);
    Ok(())
}

/// Create a user preset from a settings file.
pub fn create_preset(
    library: &mut Library,
    name: &str,
    description: &str,
    settings_path: &Path,
    tags: &[String],
) -> Result<()> {
    let settings = load_settings_file(settings_path)?.sanitized();
    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    let preset = library.create(name, description, PresetCategory::Custom, settings, &tags)?;
    println!("Preset created: {} ({})", preset.name, preset.id);
    Ok(())
}

/// Delete a user preset.
pub fn delete_preset(library: &mut Library, id: &str) -> Result<()> {
    library.delete(id)?;
    println!("Preset deleted: {}", id);
    Ok(())
}

/// Write presets to a JSON file.
pub fn export_presets(library: &Library, output: &Path, ids: &[String]) -> Result<()> {
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let json = library.export_json(&ids)?;
    fs::write(output, json)?;
    println!("Exported {} preset(s) to {}", ids.len(), output.display());
    Ok(())
}

/// Import presets from a JSON file.
pub fn import_presets(library: &mut Library, input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(VoxError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", input.display()),
        )));
    }
    let json = fs::read_to_string(input)?;
    let imported = library.import_json(&json)?;
    for preset in &imported {
        println!("Imported: {} ({})", preset.name, preset.id);
    }
    Ok(())
}
