//! Effect Settings
//!
//! `EffectSettings` is the single source of truth for every stage. Nodes
//! receive values through `SettingsPatch`, a partial mirror where only the
//! fields present are applied.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Parameter Ranges
// ============================================================================

/// Inclusive range for a numeric setting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
}

impl ParamRange {
    const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Check that a value is finite and inside the range
    pub fn contains(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// Clamp a value into the range; non-finite values fall back to `fallback`
    pub fn clamp(&self, value: f32, fallback: f32) -> f32 {
        if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            fallback
        }
    }
}

pub const PITCH_SHIFT_RANGE: ParamRange = ParamRange::new(-24.0, 24.0);
pub const UNIT_RANGE: ParamRange = ParamRange::new(0.0, 1.0);
pub const DELAY_TIME_RANGE: ParamRange = ParamRange::new(0.001, 1.0);
pub const LOWPASS_RANGE: ParamRange = ParamRange::new(20.0, 20000.0);
pub const HIGHPASS_RANGE: ParamRange = ParamRange::new(20.0, 2000.0);

// ============================================================================
// Performance Mode
// ============================================================================

/// Processing block size, serialized as the raw frame count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum PerformanceMode {
    /// 1024 frames
    Realtime,
    /// 2048 frames
    #[default]
    Balanced,
    /// 4096 frames
    Quality,
    /// 8192 frames
    Maximum,
}

impl PerformanceMode {
    pub const ALL: [PerformanceMode; 4] = [
        PerformanceMode::Realtime,
        PerformanceMode::Balanced,
        PerformanceMode::Quality,
        PerformanceMode::Maximum,
    ];

    /// Frames processed per block
    pub fn block_size(&self) -> usize {
        match self {
            PerformanceMode::Realtime => 1024,
            PerformanceMode::Balanced => 2048,
            PerformanceMode::Quality => 4096,
            PerformanceMode::Maximum => 8192,
        }
    }

    /// Exact mapping from a supported block size
    pub fn from_block_size(size: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.block_size() == size as usize)
    }
}

impl From<u32> for PerformanceMode {
    /// Unsupported sizes snap to the nearest supported one
    fn from(size: u32) -> Self {
        if let Some(mode) = Self::from_block_size(size) {
            return mode;
        }
        let nearest = Self::ALL
            .into_iter()
            .min_by_key(|mode| (mode.block_size() as i64 - size as i64).abs())
            .unwrap_or_default();
        warn!(
            requested = size,
            using = nearest.block_size(),
            "unsupported block size, snapping to nearest"
        );
        nearest
    }
}

impl From<PerformanceMode> for u32 {
    fn from(mode: PerformanceMode) -> Self {
        mode.block_size() as u32
    }
}

// ============================================================================
// Effect Settings
// ============================================================================

/// Flat record of every effect parameter and enable toggle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectSettings {
    /// Semitones, -24..=24
    pub pitch_shift: f32,
    /// Waveshaper drive, 0..=1
    pub distortion: f32,
    /// Reverb wet share, 0..=1
    pub reverb_mix: f32,
    /// Seconds, 0.001..=1.0
    pub delay_time: f32,
    /// 0..=1
    pub delay_feedback: f32,
    /// Hz, 20..=20000
    pub lowpass_freq: f32,
    /// Hz, 20..=2000
    pub highpass_freq: f32,
    /// Master enhancement amount, 0..=1
    pub ai_enhancement: f32,
    /// Noise reduction intensity, 0..=1
    pub noise_reduction: f32,
    #[serde(rename = "wasmBlockSize")]
    pub performance_mode: PerformanceMode,

    pub enable_pitch_shift: bool,
    pub enable_distortion: bool,
    pub enable_reverb: bool,
    pub enable_delay: bool,
    pub enable_lowpass: bool,
    pub enable_highpass: bool,
    #[serde(rename = "enableAIEnhancement")]
    pub enable_ai_enhancement: bool,
    pub enable_noise_reduction: bool,
    pub enable_mastering: bool,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            pitch_shift: -5.0,
            distortion: 0.4,
            reverb_mix: 0.5,
            delay_time: 0.2,
            delay_feedback: 0.3,
            lowpass_freq: 20000.0,
            highpass_freq: 100.0,
            ai_enhancement: 0.7,
            noise_reduction: 0.6,
            performance_mode: PerformanceMode::Balanced,
            enable_pitch_shift: false,
            enable_distortion: false,
            enable_reverb: false,
            enable_delay: false,
            enable_lowpass: false,
            enable_highpass: false,
            enable_ai_enhancement: true,
            enable_noise_reduction: false,
            enable_mastering: true,
        }
    }
}

/// An out-of-range setting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsIssue {
    pub field: &'static str,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

impl fmt::Display for SettingsIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} is outside [{}, {}]",
            self.field, self.value, self.min, self.max
        )
    }
}

impl EffectSettings {
    /// Settings with every toggle off
    pub fn all_disabled() -> Self {
        Self {
            enable_ai_enhancement: false,
            enable_mastering: false,
            ..Self::default()
        }
    }

    /// Settings with every toggle on
    pub fn all_enabled() -> Self {
        Self {
            enable_pitch_shift: true,
            enable_distortion: true,
            enable_reverb: true,
            enable_delay: true,
            enable_lowpass: true,
            enable_highpass: true,
            enable_ai_enhancement: true,
            enable_noise_reduction: true,
            enable_mastering: true,
            ..Self::default()
        }
    }

    fn numeric_fields(&self) -> [(&'static str, f32, ParamRange); 9] {
        [
            ("pitchShift", self.pitch_shift, PITCH_SHIFT_RANGE),
            ("distortion", self.distortion, UNIT_RANGE),
            ("reverbMix", self.reverb_mix, UNIT_RANGE),
            ("delayTime", self.delay_time, DELAY_TIME_RANGE),
            ("delayFeedback", self.delay_feedback, UNIT_RANGE),
            ("lowpassFreq", self.lowpass_freq, LOWPASS_RANGE),
            ("highpassFreq", self.highpass_freq, HIGHPASS_RANGE),
            ("aiEnhancement", self.ai_enhancement, UNIT_RANGE),
            ("noiseReduction", self.noise_reduction, UNIT_RANGE),
        ]
    }

    /// Report every out-of-range numeric field
    ///
    /// Issues are warnings: callers clamp rather than reject.
    pub fn validate(&self) -> Vec<SettingsIssue> {
        self.numeric_fields()
            .into_iter()
            .filter(|(_, value, range)| !range.contains(*value))
            .map(|(field, value, range)| SettingsIssue {
                field,
                value,
                min: range.min,
                max: range.max,
            })
            .collect()
    }

    /// Copy with every numeric field forced into range
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        Self {
            pitch_shift: PITCH_SHIFT_RANGE.clamp(self.pitch_shift, defaults.pitch_shift),
            distortion: UNIT_RANGE.clamp(self.distortion, defaults.distortion),
            reverb_mix: UNIT_RANGE.clamp(self.reverb_mix, defaults.reverb_mix),
            delay_time: DELAY_TIME_RANGE.clamp(self.delay_time, defaults.delay_time),
            delay_feedback: UNIT_RANGE.clamp(self.delay_feedback, defaults.delay_feedback),
            lowpass_freq: LOWPASS_RANGE.clamp(self.lowpass_freq, defaults.lowpass_freq),
            highpass_freq: HIGHPASS_RANGE.clamp(self.highpass_freq, defaults.highpass_freq),
            ai_enhancement: UNIT_RANGE.clamp(self.ai_enhancement, defaults.ai_enhancement),
            noise_reduction: UNIT_RANGE.clamp(self.noise_reduction, defaults.noise_reduction),
            ..self.clone()
        }
    }

    /// Clamp and log a warning for each issue found
    pub fn sanitized(&self) -> Self {
        for issue in self.validate() {
            warn!(%issue, "clamping out-of-range setting");
        }
        self.clamped()
    }

    /// Playback rate implied by the pitch setting (1.0 when disabled)
    pub fn playback_rate(&self) -> f64 {
        if self.enable_pitch_shift && self.pitch_shift != 0.0 {
            2.0_f64.powf(self.pitch_shift as f64 / 12.0)
        } else {
            1.0
        }
    }

    /// Full patch carrying every field
    pub fn to_patch(&self) -> SettingsPatch {
        SettingsPatch {
            pitch_shift: Some(self.pitch_shift),
            distortion: Some(self.distortion),
            reverb_mix: Some(self.reverb_mix),
            delay_time: Some(self.delay_time),
            delay_feedback: Some(self.delay_feedback),
            lowpass_freq: Some(self.lowpass_freq),
            highpass_freq: Some(self.highpass_freq),
            ai_enhancement: Some(self.ai_enhancement),
            noise_reduction: Some(self.noise_reduction),
            performance_mode: Some(self.performance_mode),
            enable_pitch_shift: Some(self.enable_pitch_shift),
            enable_distortion: Some(self.enable_distortion),
            enable_reverb: Some(self.enable_reverb),
            enable_delay: Some(self.enable_delay),
            enable_lowpass: Some(self.enable_lowpass),
            enable_highpass: Some(self.enable_highpass),
            enable_ai_enhancement: Some(self.enable_ai_enhancement),
            enable_noise_reduction: Some(self.enable_noise_reduction),
            enable_mastering: Some(self.enable_mastering),
        }
    }
}

// ============================================================================
// Settings Patch
// ============================================================================

/// Partial settings update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_shift: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverb_mix: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_time: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_feedback: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowpass_freq: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highpass_freq: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_enhancement: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_reduction: Option<f32>,
    #[serde(rename = "wasmBlockSize", skip_serializing_if = "Option::is_none")]
    pub performance_mode: Option<PerformanceMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_pitch_shift: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_distortion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_reverb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_delay: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_lowpass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_highpass: Option<bool>,
    #[serde(rename = "enableAIEnhancement", skip_serializing_if = "Option::is_none")]
    pub enable_ai_enhancement: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_noise_reduction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_mastering: Option<bool>,
}

impl SettingsPatch {
    /// True when no field is present
    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }

    /// Copy with every present numeric field forced into range
    ///
    /// Non-finite values fall back to the stock default for that field.
    pub fn clamped(&self) -> SettingsPatch {
        let defaults = EffectSettings::default();
        let clamp = |value: Option<f32>, range: ParamRange, fallback: f32| {
            value.map(|v| {
                if !range.contains(v) {
                    warn!(value = v, min = range.min, max = range.max, "clamping out-of-range update");
                }
                range.clamp(v, fallback)
            })
        };

        SettingsPatch {
            pitch_shift: clamp(self.pitch_shift, PITCH_SHIFT_RANGE, defaults.pitch_shift),
            distortion: clamp(self.distortion, UNIT_RANGE, defaults.distortion),
            reverb_mix: clamp(self.reverb_mix, UNIT_RANGE, defaults.reverb_mix),
            delay_time: clamp(self.delay_time, DELAY_TIME_RANGE, defaults.delay_time),
            delay_feedback: clamp(self.delay_feedback, UNIT_RANGE, defaults.delay_feedback),
            lowpass_freq: clamp(self.lowpass_freq, LOWPASS_RANGE, defaults.lowpass_freq),
            highpass_freq: clamp(self.highpass_freq, HIGHPASS_RANGE, defaults.highpass_freq),
            ai_enhancement: clamp(self.ai_enhancement, UNIT_RANGE, defaults.ai_enhancement),
            noise_reduction: clamp(self.noise_reduction, UNIT_RANGE, defaults.noise_reduction),
            ..self.clone()
        }
    }

    /// Write the present fields into `settings`
    pub fn apply_to(&self, settings: &mut EffectSettings) {
        fn set<T: Copy>(dst: &mut T, src: Option<T>) {
            if let Some(value) = src {
                *dst = value;
            }
        }

        set(&mut settings.pitch_shift, self.pitch_shift);
        set(&mut settings.distortion, self.distortion);
        set(&mut settings.reverb_mix, self.reverb_mix);
        set(&mut settings.delay_time, self.delay_time);
        set(&mut settings.delay_feedback, self.delay_feedback);
        set(&mut settings.lowpass_freq, self.lowpass_freq);
        set(&mut settings.highpass_freq, self.highpass_freq);
        set(&mut settings.ai_enhancement, self.ai_enhancement);
        set(&mut settings.noise_reduction, self.noise_reduction);
        set(&mut settings.performance_mode, self.performance_mode);
        set(&mut settings.enable_pitch_shift, self.enable_pitch_shift);
        set(&mut settings.enable_distortion, self.enable_distortion);
        set(&mut settings.enable_reverb, self.enable_reverb);
        set(&mut settings.enable_delay, self.enable_delay);
        set(&mut settings.enable_lowpass, self.enable_lowpass);
        set(&mut settings.enable_highpass, self.enable_highpass);
        set(&mut settings.enable_ai_enhancement, self.enable_ai_enhancement);
        set(&mut settings.enable_noise_reduction, self.enable_noise_reduction);
        set(&mut settings.enable_mastering, self.enable_mastering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_defaults_are_in_range() {
        assert!(EffectSettings::default().validate().is_empty());
        assert!(EffectSettings::all_enabled().validate().is_empty());
    }

    #[test]
    fn test_validate_reports_and_clamped_fixes() {
        let settings = EffectSettings {
            pitch_shift: 30.0,
            highpass_freq: 5000.0,
            reverb_mix: f32::NAN,
            ..EffectSettings::default()
        };
        let fields: Vec<_> = settings.validate().iter().map(|i| i.field).collect();
        assert_eq!(fields, vec!["pitchShift", "reverbMix", "highpassFreq"]);

        let clamped = settings.clamped();
        assert_eq!(clamped.pitch_shift, 24.0);
        assert_eq!(clamped.highpass_freq, 2000.0);
        assert_eq!(clamped.reverb_mix, 0.5);
        assert!(clamped.validate().is_empty());
    }

    #[test_case(1024, PerformanceMode::Realtime ; "exact 1024")]
    #[test_case(8192, PerformanceMode::Maximum ; "exact 8192")]
    #[test_case(3000, PerformanceMode::Balanced ; "snaps down")]
    #[test_case(3500, PerformanceMode::Quality ; "snaps up")]
    #[test_case(100_000, PerformanceMode::Maximum ; "snaps to largest")]
    fn test_block_size_snapping(size: u32, expected: PerformanceMode) {
        assert_eq!(PerformanceMode::from(size), expected);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(EffectSettings::default()).unwrap();
        assert_eq!(json["wasmBlockSize"], 2048);
        assert_eq!(json["enableAIEnhancement"], true);

        let parsed: EffectSettings =
            serde_json::from_str(r#"{"pitchShift": 12, "enableDelay": true}"#).unwrap();
        assert_eq!(parsed.pitch_shift, 12.0);
        assert!(parsed.enable_delay);
        assert_eq!(parsed.reverb_mix, 0.5);
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let mut settings = EffectSettings::default();
        let patch = SettingsPatch {
            reverb_mix: Some(0.9),
            enable_reverb: Some(true),
            ..SettingsPatch::default()
        };
        patch.apply_to(&mut settings);
        patch.apply_to(&mut settings);

        assert_eq!(
            settings,
            EffectSettings {
                reverb_mix: 0.9,
                enable_reverb: true,
                ..EffectSettings::default()
            }
        );
        assert!(SettingsPatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patch_clamped_keeps_absent_fields_absent() {
        let patch = SettingsPatch {
            delay_time: Some(5.0),
            lowpass_freq: Some(f32::INFINITY),
            enable_delay: Some(true),
            ..SettingsPatch::default()
        };
        let clamped = patch.clamped();
        assert_eq!(clamped.delay_time, Some(1.0));
        assert_eq!(clamped.lowpass_freq, Some(20000.0));
        assert_eq!(clamped.enable_delay, Some(true));
        assert_eq!(clamped.reverb_mix, None);
    }

    #[test]
    fn test_full_patch_reproduces_settings() {
        let source = EffectSettings::all_enabled();
        let mut target = EffectSettings::all_disabled();
        source.to_patch().apply_to(&mut target);
        assert_eq!(target, source);
    }

    #[test]
    fn test_playback_rate() {
        let mut settings = EffectSettings::default();
        assert_eq!(settings.playback_rate(), 1.0);
        settings.enable_pitch_shift = true;
        settings.pitch_shift = 12.0;
        assert!((settings.playback_rate() - 2.0).abs() < 1e-12);
    }
}
