//! Processing Graph
//!
//! A [`Graph`] is the ordered list of stages for one effect configuration
//! plus a single-use source that reads the input buffer at the pitch-shift
//! playback rate. Preview and offline graphs come out of the same
//! [`GraphBuilder::build`] call; the two [`NodeFactory`] implementations
//! differ only in parameter ramp length and in whether a meter tap is
//! appended.
//!
//! Canonical order:
//! 1. High-pass filter
//! 2. Low-pass filter
//! 3. Noise reduction
//! 4. Voice enhancement (adaptive, or static fallback)
//! 5. Distortion
//! 6. Compressor (always present)
//! 7. Delay
//! 8. Reverb
//! 9. Mastering chain
//! 10. Safety limiter (always present)
//! 11. Meter tap (preview only)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{SpectrumAnalyzer, VoiceAnalyzer, VoiceProfile};
use crate::dsp::{
    estimate_noise_floor, AdaptiveEnhancer, BasicEnhancer, Compressor, Delay, Distortion,
    MasteringChain, MeterHandle, MeterTap, NodeContext, NoiseReduction, PassFilter,
    ProcessingNode, Reverb, SafetyLimiter, MIN_NOISE_FLOOR,
};
use crate::engine::buffer::SampleBuffer;
use crate::engine::settings::{EffectSettings, SettingsPatch};
use crate::error::{Result, VoxError};

pub use crate::dsp::StageKind;

/// Parameter ramp used by live preview graphs
pub const PREVIEW_RAMP_MS: f64 = 20.0;

/// Lowest sample rate a graph can be built for
pub const MIN_SAMPLE_RATE: u32 = 8000;

// ============================================================================
// Context & Resource Tracking
// ============================================================================

/// Which kind of consumer a graph is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphContext {
    Preview,
    Offline,
}

/// Shared counter of live (created and not yet disposed) nodes
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    live: Arc<AtomicUsize>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes currently alive
    pub fn live_nodes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Node wrapper that keeps a [`ResourceTracker`] in step with its lifetime
struct Tracked {
    inner: Box<dyn ProcessingNode>,
    tracker: ResourceTracker,
    live: bool,
}

impl Tracked {
    fn new(inner: Box<dyn ProcessingNode>, tracker: ResourceTracker) -> Self {
        tracker.acquire();
        Self {
            inner,
            tracker,
            live: true,
        }
    }

    fn release(&mut self) {
        if self.live {
            self.live = false;
            self.tracker.release();
        }
    }
}

impl ProcessingNode for Tracked {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    fn process(&mut self, block: &mut SampleBuffer) -> Result<()> {
        self.inner.process(block)
    }

    fn set_params(&mut self, patch: &SettingsPatch) -> Result<()> {
        self.inner.set_params(patch)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn dispose(&mut self) {
        self.inner.dispose();
        self.release();
    }

    fn latency_samples(&self) -> usize {
        self.inner.latency_samples()
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Node Factory
// ============================================================================

/// Constructs the nodes of a graph for one context
///
/// The stage constructors are shared; implementors only choose the context,
/// the ramp length and whether a meter tap exists.
pub trait NodeFactory {
    fn context(&self) -> GraphContext;

    /// Ramp length for `set_params` changes at `sample_rate`
    fn ramp_samples(&self, sample_rate: f64) -> usize;

    /// Counter every constructed node reports to
    fn tracker(&self) -> &ResourceTracker;

    /// Metering tap appended after the limiter, if this context has one
    fn meter_tap(&self) -> Option<(Box<dyn ProcessingNode>, MeterHandle)> {
        None
    }

    fn node_context(&self, sample_rate: f64, channels: usize) -> NodeContext {
        NodeContext::new(sample_rate, channels, self.ramp_samples(sample_rate))
    }

    fn track(&self, node: Box<dyn ProcessingNode>) -> Box<dyn ProcessingNode> {
        Box::new(Tracked::new(node, self.tracker().clone()))
    }

    fn high_pass(&self, ctx: NodeContext, frequency: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(PassFilter::high_pass(ctx, frequency)))
    }

    fn low_pass(&self, ctx: NodeContext, frequency: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(PassFilter::low_pass(ctx, frequency)))
    }

    fn noise_reduction(
        &self,
        ctx: NodeContext,
        noise_floor: f32,
        intensity: f32,
    ) -> Box<dyn ProcessingNode> {
        self.track(Box::new(NoiseReduction::new(ctx, noise_floor, intensity)))
    }

    fn adaptive_enhancer(
        &self,
        ctx: NodeContext,
        profile: VoiceProfile,
        amount: f32,
    ) -> Box<dyn ProcessingNode> {
        self.track(Box::new(AdaptiveEnhancer::new(ctx, Some(profile), amount)))
    }

    fn basic_enhancer(&self, ctx: NodeContext, amount: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(BasicEnhancer::new(ctx, amount)))
    }

    fn distortion(&self, ctx: NodeContext, amount: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(Distortion::new(ctx, amount)))
    }

    fn compressor(&self, ctx: NodeContext) -> Box<dyn ProcessingNode> {
        self.track(Box::new(Compressor::new(ctx)))
    }

    fn delay(&self, ctx: NodeContext, time: f32, feedback: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(Delay::new(ctx, time, feedback)))
    }

    fn reverb(&self, ctx: NodeContext, mix: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(Reverb::new(ctx, mix)))
    }

    fn mastering(&self, ctx: NodeContext, enhancement: f32) -> Box<dyn ProcessingNode> {
        self.track(Box::new(MasteringChain::new(ctx, enhancement)))
    }

    fn limiter(&self, ctx: NodeContext) -> Box<dyn ProcessingNode> {
        self.track(Box::new(SafetyLimiter::new(ctx)))
    }
}

/// Factory for live preview graphs: ramped updates and a meter tap
#[derive(Debug, Clone)]
pub struct PreviewFactory {
    tracker: ResourceTracker,
    ramp_ms: f64,
}

impl PreviewFactory {
    pub fn new() -> Self {
        Self::with_tracker(ResourceTracker::new())
    }

    pub fn with_tracker(tracker: ResourceTracker) -> Self {
        Self {
            tracker,
            ramp_ms: PREVIEW_RAMP_MS,
        }
    }
}

impl Default for PreviewFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for PreviewFactory {
    fn context(&self) -> GraphContext {
        GraphContext::Preview
    }

    fn ramp_samples(&self, sample_rate: f64) -> usize {
        (self.ramp_ms * 0.001 * sample_rate).round() as usize
    }

    fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    fn meter_tap(&self) -> Option<(Box<dyn ProcessingNode>, MeterHandle)> {
        let tap = MeterTap::new();
        let handle = tap.handle();
        Some((self.track(Box::new(tap)), handle))
    }
}

/// Factory for offline renders: immediate updates, no tap
#[derive(Debug, Clone, Default)]
pub struct OfflineFactory {
    tracker: ResourceTracker,
}

impl OfflineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(tracker: ResourceTracker) -> Self {
        Self { tracker }
    }
}

impl NodeFactory for OfflineFactory {
    fn context(&self) -> GraphContext {
        GraphContext::Offline
    }

    fn ramp_samples(&self, _sample_rate: f64) -> usize {
        0
    }

    fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }
}

// ============================================================================
// Source
// ============================================================================

/// Reads the input buffer at a fixed playback rate
struct GraphSource {
    buffer: SampleBuffer,
    rate: f64,
    output_len: usize,
    cursor: usize,
}

impl GraphSource {
    fn new(buffer: SampleBuffer, rate: f64) -> Self {
        let mut source = Self {
            buffer,
            rate: 1.0,
            output_len: 0,
            cursor: 0,
        };
        source.set_rate(rate);
        source
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        self.output_len = if self.rate == 1.0 {
            self.buffer.len()
        } else {
            (self.buffer.len() as f64 / self.rate).round() as usize
        };
    }

    fn remaining(&self) -> usize {
        self.output_len - self.cursor
    }

    fn read(&mut self, frames: usize) -> SampleBuffer {
        let n = frames.min(self.remaining());
        let start = self.cursor;
        self.cursor += n;

        if self.rate == 1.0 {
            return self.buffer.slice(start, n);
        }

        let rate = self.rate;
        let samples = self
            .buffer
            .samples
            .iter()
            .map(|input| {
                let last = input.len() - 1;
                (start..start + n)
                    .map(|j| {
                        let pos = j as f64 * rate;
                        let index = (pos.floor() as usize).min(last);
                        let frac = (pos - index as f64) as f32;
                        if index < last {
                            input[index] * (1.0 - frac) + input[index + 1] * frac
                        } else {
                            input[last]
                        }
                    })
                    .collect()
            })
            .collect();

        SampleBuffer {
            samples,
            sample_rate: self.buffer.sample_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    Started,
    Disposed,
}

// ============================================================================
// Graph
// ============================================================================

/// Ordered stages plus a single-use source
pub struct Graph {
    context: GraphContext,
    stages: Vec<Box<dyn ProcessingNode>>,
    source: GraphSource,
    meter: Option<MeterHandle>,
    settings: EffectSettings,
    block_size: usize,
    state: SourceState,
}

impl Graph {
    pub fn context(&self) -> GraphContext {
        self.context
    }

    /// Every stage, taps included
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Stages that transform the signal, in order
    pub fn processing_stages(&self) -> Vec<StageKind> {
        self.stages
            .iter()
            .map(|s| s.kind())
            .filter(|k| !k.is_tap())
            .collect()
    }

    /// Settings the graph was built with, plus later updates
    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    pub fn meter(&self) -> Option<&MeterHandle> {
        self.meter.as_ref()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total frames the source will produce
    pub fn output_len(&self) -> usize {
        self.source.output_len
    }

    /// Frames not yet pulled from the source
    pub fn remaining_frames(&self) -> usize {
        self.source.remaining()
    }

    pub fn is_started(&self) -> bool {
        self.state == SourceState::Started
    }

    pub fn is_disposed(&self) -> bool {
        self.state == SourceState::Disposed
    }

    /// Sum of stage latencies in samples
    pub fn latency_samples(&self) -> usize {
        self.stages.iter().map(|s| s.latency_samples()).sum()
    }

    /// Start the source; it can only be started once
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SourceState::Idle => {
                self.state = SourceState::Started;
                debug!(context = ?self.context, frames = self.source.output_len, "graph started");
                Ok(())
            }
            SourceState::Started => Err(VoxError::SourceAlreadyStarted),
            SourceState::Disposed => Err(VoxError::GraphDisposed),
        }
    }

    fn ensure_started(&self) -> Result<()> {
        match self.state {
            SourceState::Started => Ok(()),
            SourceState::Idle => Err(VoxError::SourceNotStarted),
            SourceState::Disposed => Err(VoxError::GraphDisposed),
        }
    }

    /// Pull and process the next block; `None` once the source is exhausted
    pub fn next_block(&mut self) -> Result<Option<SampleBuffer>> {
        self.ensure_started()?;
        if self.source.remaining() == 0 {
            return Ok(None);
        }
        let mut block = self.source.read(self.block_size);
        self.run_stages(&mut block);
        Ok(Some(block))
    }

    /// Push `frames` of silence through the stages to drain their tails
    pub fn flush(&mut self, frames: usize) -> Result<SampleBuffer> {
        self.ensure_started()?;
        let channels = self.source.buffer.num_channels();
        let sample_rate = self.source.buffer.sample_rate;
        let mut out = SampleBuffer::silence(channels, 0, sample_rate);

        let mut left = frames;
        while left > 0 {
            let n = left.min(self.block_size);
            let mut block = SampleBuffer::silence(channels, n, sample_rate);
            self.run_stages(&mut block);
            out.append(&block)?;
            left -= n;
        }
        Ok(out)
    }

    /// Run every stage; a stage that fails or leaves non-finite samples is
    /// bypassed for this block and its history cleared
    fn run_stages(&mut self, block: &mut SampleBuffer) {
        for stage in &mut self.stages {
            let before = block.clone();
            match stage.process(block) {
                Ok(()) if block.is_finite() => {}
                Ok(()) => {
                    let err = VoxError::DspOverflow {
                        stage: stage.kind().label().to_string(),
                    };
                    warn!(error = %err, "stage bypassed for this block");
                    *block = before;
                    stage.reset();
                }
                Err(err) => {
                    warn!(stage = %stage.kind(), error = %err, "stage failed; bypassed for this block");
                    *block = before;
                    stage.reset();
                }
            }
        }
    }

    /// Push a parameter update to every stage in order
    ///
    /// Failures are logged and do not stop the remaining stages. Pitch
    /// changes only take effect before the source is started.
    pub fn update_params(&mut self, patch: &SettingsPatch) {
        if self.state == SourceState::Disposed {
            warn!("parameter update ignored: graph is disposed");
            return;
        }

        let patch = patch.clamped();
        patch.apply_to(&mut self.settings);

        if let Some(mode) = patch.performance_mode {
            self.block_size = mode.block_size();
        }
        if patch.pitch_shift.is_some() || patch.enable_pitch_shift.is_some() {
            if self.state == SourceState::Idle {
                self.source.set_rate(self.settings.playback_rate());
            } else {
                debug!("pitch change applies to the next graph");
            }
        }

        for stage in &mut self.stages {
            if let Err(err) = stage.set_params(&patch) {
                warn!(stage = %stage.kind(), error = %err, "set_params failed");
            }
        }
    }

    /// Dispose every stage; safe to call more than once
    pub fn dispose(&mut self) {
        if self.state == SourceState::Disposed {
            return;
        }
        for stage in &mut self.stages {
            stage.dispose();
        }
        self.stages.clear();
        self.state = SourceState::Disposed;
        debug!(context = ?self.context, "graph disposed");
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("context", &self.context)
            .field("stages", &self.stage_kinds())
            .field("block_size", &self.block_size)
            .field("state", &self.state)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Single construction path for preview and offline graphs
#[derive(Debug, Default)]
pub struct GraphBuilder {
    voice: VoiceAnalyzer,
    spectrum: SpectrumAnalyzer,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voice_analyzer(&self) -> &VoiceAnalyzer {
        &self.voice
    }

    /// Build a graph for `buffer` with `settings`
    ///
    /// Settings are clamped first. Voice analysis and noise-floor estimation
    /// run once here, only for the stages that need them.
    pub fn build(
        &self,
        factory: &dyn NodeFactory,
        buffer: &SampleBuffer,
        settings: &EffectSettings,
    ) -> Result<Graph> {
        buffer.ensure_processable()?;
        if buffer.sample_rate < MIN_SAMPLE_RATE {
            return Err(VoxError::invalid_audio(format!(
                "sample rate {} Hz is below the {} Hz minimum",
                buffer.sample_rate, MIN_SAMPLE_RATE
            )));
        }
        let settings = settings.sanitized();
        let ctx = factory.node_context(buffer.sample_rate as f64, buffer.num_channels());

        let mut stages: Vec<Box<dyn ProcessingNode>> = Vec::new();

        if settings.enable_highpass {
            stages.push(factory.high_pass(ctx, settings.highpass_freq));
        }
        if settings.enable_lowpass {
            stages.push(factory.low_pass(ctx, settings.lowpass_freq));
        }
        if settings.enable_noise_reduction {
            let floor = estimate_noise_floor(buffer, &self.spectrum).unwrap_or_else(|err| {
                warn!(error = %err, "noise floor estimate failed; using minimum floor");
                MIN_NOISE_FLOOR
            });
            stages.push(factory.noise_reduction(ctx, floor, settings.noise_reduction));
        }
        if settings.enable_ai_enhancement {
            let node = match self.voice.analyze(buffer) {
                Ok(profile) => {
                    debug!(
                        f0 = profile.fundamental_freq,
                        voice_type = %profile.voice_type,
                        "voice profile ready"
                    );
                    factory.adaptive_enhancer(ctx, profile, settings.ai_enhancement)
                }
                Err(err) => {
                    warn!(error = %err, "voice analysis failed; using static enhancement");
                    factory.basic_enhancer(ctx, settings.ai_enhancement)
                }
            };
            stages.push(node);
        }
        if settings.enable_distortion {
            stages.push(factory.distortion(ctx, settings.distortion));
        }
        stages.push(factory.compressor(ctx));
        if settings.enable_delay {
            stages.push(factory.delay(ctx, settings.delay_time, settings.delay_feedback));
        }
        if settings.enable_reverb {
            stages.push(factory.reverb(ctx, settings.reverb_mix));
        }
        if settings.enable_mastering {
            stages.push(factory.mastering(ctx, settings.ai_enhancement));
        }
        stages.push(factory.limiter(ctx));

        let meter = factory.meter_tap().map(|(tap, handle)| {
            stages.push(tap);
            handle
        });

        let graph = Graph {
            context: factory.context(),
            source: GraphSource::new(buffer.clone(), settings.playback_rate()),
            block_size: settings.performance_mode.block_size(),
            settings,
            stages,
            meter,
            state: SourceState::Idle,
        };
        debug!(
            context = ?graph.context,
            stages = ?graph.stage_kinds(),
            latency = graph.latency_samples(),
            "graph built"
        );
        Ok(graph)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::peak_linear;
    use crate::engine::io::{generate_test_tone, generate_voice_like};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn drain(graph: &mut Graph) -> SampleBuffer {
        graph.start().unwrap();
        let mut out = SampleBuffer::silence(graph.source.buffer.num_channels(), 0, 48000);
        while let Some(block) = graph.next_block().unwrap() {
            out.append(&block).unwrap();
        }
        out
    }

    #[test]
    fn test_full_chain_order() {
        let builder = GraphBuilder::new();
        let buffer = generate_voice_like(140.0, 0.5, 48000);
        let graph = builder
            .build(&PreviewFactory::new(), &buffer, &EffectSettings::all_enabled())
            .unwrap();

        assert_eq!(
            graph.stage_kinds(),
            vec![
                StageKind::HighPass,
                StageKind::LowPass,
                StageKind::NoiseReduction,
                StageKind::VoiceEnhancement,
                StageKind::Distortion,
                StageKind::Compressor,
                StageKind::Delay,
                StageKind::Reverb,
                StageKind::Mastering,
                StageKind::Limiter,
                StageKind::Meter,
            ]
        );
        assert!(graph.meter().is_some());
    }

    #[test]
    fn test_preview_and_offline_share_stage_list() {
        let builder = GraphBuilder::new();
        let buffer = generate_voice_like(140.0, 0.5, 48000);
        let configs = [
            EffectSettings::default(),
            EffectSettings::all_disabled(),
            EffectSettings::all_enabled(),
            EffectSettings {
                enable_reverb: true,
                enable_highpass: true,
                enable_mastering: false,
                ..EffectSettings::default()
            },
        ];

        for settings in &configs {
            let preview = builder.build(&PreviewFactory::new(), &buffer, settings).unwrap();
            let offline = builder.build(&OfflineFactory::new(), &buffer, settings).unwrap();
            assert_eq!(preview.processing_stages(), offline.processing_stages());
            assert_eq!(offline.stage_kinds(), offline.processing_stages());
        }
    }

    #[test]
    fn test_preview_and_offline_render_identically() {
        let builder = GraphBuilder::new();
        let buffer = generate_voice_like(180.0, 0.3, 48000);
        let settings = EffectSettings {
            enable_delay: true,
            enable_reverb: true,
            enable_distortion: true,
            distortion: 0.1,
            ..EffectSettings::default()
        };

        let mut preview = builder.build(&PreviewFactory::new(), &buffer, &settings).unwrap();
        let mut offline = builder.build(&OfflineFactory::new(), &buffer, &settings).unwrap();
        assert_eq!(drain(&mut preview), drain(&mut offline));
    }

    #[test]
    fn test_always_on_stages() {
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.5, 0.2, 48000);
        let graph = builder
            .build(&OfflineFactory::new(), &buffer, &EffectSettings::all_disabled())
            .unwrap();
        assert_eq!(
            graph.processing_stages(),
            vec![StageKind::Compressor, StageKind::Limiter]
        );
        assert_eq!(graph.latency_samples(), 0);
    }

    #[test]
    fn test_mastering_latency_is_reported() {
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.5, 0.2, 48000);
        let settings = EffectSettings {
            enable_ai_enhancement: false,
            ..EffectSettings::default()
        };
        let graph = builder.build(&OfflineFactory::new(), &buffer, &settings).unwrap();
        assert_eq!(graph.latency_samples(), 240);
    }

    #[test]
    fn test_rejects_sample_rate_below_minimum() {
        let builder = GraphBuilder::new();
        let buffer = SampleBuffer::mono(vec![0.1; 100], 16);
        let err = builder
            .build(&OfflineFactory::new(), &buffer, &EffectSettings::default())
            .unwrap_err();
        assert!(matches!(err, VoxError::InvalidAudio { .. }));

        let telephone = generate_test_tone(440.0, 0.5, 0.1, MIN_SAMPLE_RATE);
        assert!(builder
            .build(&OfflineFactory::new(), &telephone, &EffectSettings::default())
            .is_ok());
    }

    #[test]
    fn test_unanalyzable_input_uses_static_enhancement() {
        let builder = GraphBuilder::new();
        // Too short for pitch analysis
        let buffer = generate_test_tone(440.0, 0.5, 0.01, 48000);
        let graph = builder
            .build(&OfflineFactory::new(), &buffer, &EffectSettings::default())
            .unwrap();
        assert!(graph.processing_stages().contains(&StageKind::VoiceEnhancement));
    }

    #[test]
    fn test_source_is_single_use() {
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.5, 0.1, 48000);
        let mut graph = builder
            .build(&OfflineFactory::new(), &buffer, &EffectSettings::all_disabled())
            .unwrap();

        assert!(matches!(graph.next_block(), Err(VoxError::SourceNotStarted)));
        graph.start().unwrap();
        assert!(matches!(graph.start(), Err(VoxError::SourceAlreadyStarted)));

        graph.dispose();
        graph.dispose();
        assert!(matches!(graph.start(), Err(VoxError::GraphDisposed)));
        assert!(matches!(graph.next_block(), Err(VoxError::GraphDisposed)));
    }

    #[test_case(12.0, 44100, 22050 ; "octave up")]
    #[test_case(-12.0, 44100, 88200 ; "octave down")]
    #[test_case(7.0, 48000, 32036 ; "fifth up")]
    #[test_case(0.0, 48000, 48000 ; "unison")]
    fn test_pitch_output_length(semitones: f32, input_len: usize, expected: usize) {
        let builder = GraphBuilder::new();
        let buffer = SampleBuffer::mono(vec![0.1; input_len], 48000);
        let settings = EffectSettings {
            pitch_shift: semitones,
            enable_pitch_shift: true,
            ..EffectSettings::all_disabled()
        };
        let mut graph = builder.build(&OfflineFactory::new(), &buffer, &settings).unwrap();
        assert_eq!(graph.output_len(), expected);
        assert_eq!(drain(&mut graph).len(), expected);
    }

    #[test]
    fn test_octave_up_reads_every_other_sample() {
        let ramp: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0 * 0.1).collect();
        let mut source = GraphSource::new(SampleBuffer::mono(ramp.clone(), 48000), 2.0);
        let block = source.read(10);
        for (j, &s) in block.channel(0).iter().enumerate() {
            assert_eq!(s, ramp[2 * j]);
        }
    }

    #[test]
    fn test_block_size_follows_performance_mode() {
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.5, 0.2, 48000);
        let mut graph = builder
            .build(&OfflineFactory::new(), &buffer, &EffectSettings::all_disabled())
            .unwrap();
        assert_eq!(graph.block_size(), 2048);

        graph.start().unwrap();
        assert_eq!(graph.next_block().unwrap().unwrap().len(), 2048);
        graph.update_params(&SettingsPatch {
            performance_mode: Some(crate::engine::settings::PerformanceMode::Realtime),
            ..SettingsPatch::default()
        });
        assert_eq!(graph.next_block().unwrap().unwrap().len(), 1024);
    }

    #[test]
    fn test_tracker_counts_nodes() {
        let tracker = ResourceTracker::new();
        let factory = OfflineFactory::with_tracker(tracker.clone());
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.5, 0.2, 48000);

        let mut graph = builder
            .build(&factory, &buffer, &EffectSettings::all_disabled())
            .unwrap();
        assert_eq!(tracker.live_nodes(), 2);
        graph.dispose();
        assert_eq!(tracker.live_nodes(), 0);

        {
            let _dropped = builder
                .build(&factory, &buffer, &EffectSettings::all_enabled())
                .unwrap();
            assert_eq!(tracker.live_nodes(), 10);
        }
        assert_eq!(tracker.live_nodes(), 0);
    }

    #[test]
    fn test_meter_sees_preview_output() {
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.25, 0.2, 48000);
        let mut graph = builder
            .build(&PreviewFactory::new(), &buffer, &EffectSettings::all_disabled())
            .unwrap();
        let handle = graph.meter().cloned().unwrap();
        graph.start().unwrap();
        let block = graph.next_block().unwrap().unwrap();

        let reading = handle.reading();
        assert_eq!(reading.blocks, 1);
        assert!(reading.peak > 0.0);
        assert_eq!(reading.peak, peak_linear(block.channel(0)));
    }

    #[test]
    fn test_update_params_reaches_stages() {
        let builder = GraphBuilder::new();
        let buffer = generate_test_tone(440.0, 0.25, 0.2, 48000);
        let settings = EffectSettings {
            enable_reverb: true,
            ..EffectSettings::all_disabled()
        };
        let mut graph = builder.build(&OfflineFactory::new(), &buffer, &settings).unwrap();
        graph.update_params(&SettingsPatch {
            reverb_mix: Some(3.0),
            ..SettingsPatch::default()
        });
        assert_eq!(graph.settings().reverb_mix, 1.0);
    }
}
