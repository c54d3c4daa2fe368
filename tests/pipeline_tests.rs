//! Pipeline Integration Tests
//!
//! End-to-end tests for the voxform graph builder, renderer and codec.

use pretty_assertions::assert_eq;
use test_case::test_case;

use voxform::analysis::{classify_voice, VoiceAnalyzer, VoiceType};
use voxform::dsp::expander_gain;
use voxform::engine::buffer::{calculate_peak, SampleBuffer};
use voxform::engine::graph::{GraphBuilder, OfflineFactory, PreviewFactory, StageKind};
use voxform::engine::io::{decode_wav, generate_test_tone, generate_voice_like, WavEncoder};
use voxform::engine::settings::{EffectSettings, SettingsPatch};
use voxform::engine::{render_offline, BufferSink, VoiceEngine};

fn quiet() -> impl FnMut(&str, f32) {
    |_: &str, _: f32| {}
}

// === Rendering Tests ===

#[test]
fn test_all_disabled_quiet_render_is_identity() {
    let tone = generate_test_tone(440.0, 0.005, 0.5, 48000);
    let rendered = render_offline(&tone, &EffectSettings::all_disabled(), &mut quiet());
    assert_eq!(rendered, tone);
}

#[test]
fn test_full_chain_output_is_finite_and_bounded() {
    let voice = generate_voice_like(140.0, 1.0, 48000);
    let rendered = render_offline(&voice, &EffectSettings::all_enabled(), &mut quiet());

    assert!(rendered.is_finite());
    assert_eq!(rendered.num_channels(), voice.num_channels());
    // Default pitch shift is -5 semitones, so the output is longer
    assert!(rendered.len() > voice.len());
    assert!(calculate_peak(&rendered) <= 0.0);
}

#[test]
fn test_failed_render_returns_input() {
    let empty = SampleBuffer::silence(2, 0, 48000);
    let rendered = render_offline(&empty, &EffectSettings::default(), &mut quiet());
    assert_eq!(rendered, empty);
}

#[test_case(16 ; "sixteen hertz")]
#[test_case(21 ; "just under nyquist floor")]
#[test_case(4000 ; "below telephone rate")]
fn test_unusable_sample_rate_returns_input(sample_rate: u32) {
    let buffer = SampleBuffer::mono(vec![0.1; 100], sample_rate);
    let rendered = render_offline(&buffer, &EffectSettings::default(), &mut quiet());
    assert_eq!(rendered, buffer);
}

#[test]
fn test_empty_buffer_with_default_settings_returns_input() {
    for channels in [1, 2] {
        let empty = SampleBuffer::silence(channels, 0, 44100);
        let rendered = render_offline(&empty, &EffectSettings::all_enabled(), &mut quiet());
        assert_eq!(rendered, empty);
    }
}

#[test_case(8000 ; "telephone")]
#[test_case(22050 ; "half cd")]
#[test_case(96000 ; "high resolution")]
fn test_non_standard_sample_rate_renders(sample_rate: u32) {
    let voice = generate_voice_like(150.0, 0.3, sample_rate);
    let rendered = render_offline(&voice, &EffectSettings::all_enabled(), &mut quiet());
    assert_ne!(rendered, voice);
    assert!(rendered.is_finite());
    assert_eq!(rendered.sample_rate, sample_rate);
}

#[test_case(12, 44100, 22050 ; "octave up")]
#[test_case(-12, 44100, 88200 ; "octave down")]
#[test_case(0, 44100, 44100 ; "unison")]
fn test_pitch_shift_output_length(semitones: i32, input_len: usize, expected: usize) {
    let settings = EffectSettings {
        enable_pitch_shift: true,
        pitch_shift: semitones as f32,
        ..EffectSettings::all_disabled()
    };
    let buffer = generate_test_tone(220.0, 0.005, input_len as f32 / 44100.0, 44100);
    assert_eq!(buffer.len(), input_len);

    let rendered = render_offline(&buffer, &settings, &mut quiet());
    assert!((rendered.len() as i64 - expected as i64).abs() <= 1);
}

// === Graph Tests ===

#[test]
fn test_preview_and_offline_graphs_share_order() {
    let builder = GraphBuilder::new();
    let voice = generate_voice_like(120.0, 0.5, 48000);

    for settings in [
        EffectSettings::default(),
        EffectSettings::all_enabled(),
        EffectSettings::all_disabled(),
    ] {
        let preview = builder
            .build(&PreviewFactory::new(), &voice, &settings)
            .unwrap();
        let offline = builder
            .build(&OfflineFactory::new(), &voice, &settings)
            .unwrap();
        assert_eq!(preview.processing_stages(), offline.processing_stages());
        assert_eq!(preview.stage_kinds().last(), Some(&StageKind::Meter));
    }
}

#[test]
fn test_engine_preview_plays_once() {
    let mut engine = VoiceEngine::with_settings(EffectSettings::all_disabled());
    let tone = generate_test_tone(440.0, 0.005, 0.25, 48000);
    engine.load(&tone).unwrap();

    let mut sink = BufferSink::new();
    let frames = engine.play(&mut sink).unwrap();
    assert_eq!(frames, tone.len());
    assert!(sink.is_finished());

    let mut again = BufferSink::new();
    assert!(engine.play(&mut again).is_err());
}

#[test]
fn test_live_update_changes_settings() {
    let mut engine = VoiceEngine::new();
    engine.load(&generate_voice_like(150.0, 0.3, 48000)).unwrap();
    engine.update_params(&SettingsPatch {
        reverb_mix: Some(0.25),
        ..SettingsPatch::default()
    });

    assert_eq!(engine.settings().reverb_mix, 0.25);
    assert_eq!(engine.live_graph().unwrap().settings().reverb_mix, 0.25);
}

// === Analysis Tests ===

#[test_case(100.0, 400.0, VoiceType::Male ; "low voice")]
#[test_case(200.0, 600.0, VoiceType::Female ; "high voice")]
#[test_case(150.0, 450.0, VoiceType::Unknown ; "ambiguous")]
fn test_voice_classification(f0: f64, formant: f64, expected: VoiceType) {
    assert_eq!(classify_voice(f0, formant), expected);
}

#[test]
fn test_voice_profile_of_synthetic_voice() {
    let voice = generate_voice_like(100.0, 1.0, 48000);
    let profile = VoiceAnalyzer::new().analyze(&voice).unwrap();
    assert!((profile.fundamental_freq - 100.0).abs() < 6.0);
    assert!(!profile.formants.is_empty());
}

#[test]
fn test_expander_gain_monotonic_in_intensity() {
    let floor = 0.02;
    for level in [0.0, 0.005, 0.01, 0.03] {
        let mut previous = f32::INFINITY;
        for step in 0..=10 {
            let gain = expander_gain(level, floor * 3.0, step as f32 / 10.0);
            assert!(gain <= previous);
            previous = gain;
        }
    }
}

// === Codec Tests ===

#[test]
fn test_wav_round_trip_within_one_lsb() {
    let voice = generate_voice_like(180.0, 0.2, 44100);
    for bit_depth in [16u16, 24] {
        let bytes = WavEncoder::new(bit_depth).unwrap().encode(&voice);
        let decoded = decode_wav(&bytes).unwrap();
        let lsb = 1.0 / ((1u32 << (bit_depth - 1)) - 1) as f32;

        assert_eq!(decoded.len(), voice.len());
        let max_error = voice
            .channel(0)
            .iter()
            .zip(decoded.channel(0))
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_error <= lsb, "{}-bit error {}", bit_depth, max_error);
    }
}
