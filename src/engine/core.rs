//! Voice Engine
//!
//! [`VoiceEngine`] is the caller-owned entry point: it keeps the current
//! settings, owns at most one live preview graph and runs offline renders.
//!
//! Offline rendering pulls blocks through an offline graph, drains the
//! graph latency with silence and drops the leading latency samples so the
//! output lines up with the input. Any failure returns the input unchanged.

use tracing::{debug, error, info};

use crate::analysis::{VoiceMetrics, VoiceProfile};
use crate::dsp::MeterHandle;
use crate::engine::buffer::SampleBuffer;
use crate::engine::graph::{Graph, GraphBuilder, OfflineFactory, PreviewFactory, ResourceTracker};
use crate::engine::settings::{EffectSettings, SettingsPatch};
use crate::error::{Result, VoxError};

// ============================================================================
// Playback Sink
// ============================================================================

/// Destination for blocks pulled from a live graph
pub trait PlaybackSink {
    fn write_block(&mut self, block: &SampleBuffer) -> Result<()>;

    /// Called once after the last block
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that collects every block into one buffer
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: Option<SampleBuffer>,
    finished: bool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Frames received so far
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, SampleBuffer::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_buffer(self) -> Option<SampleBuffer> {
        self.buffer
    }
}

impl PlaybackSink for BufferSink {
    fn write_block(&mut self, block: &SampleBuffer) -> Result<()> {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.append(block),
            None => {
                self.buffer = Some(block.clone());
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

// ============================================================================
// Offline Renderer
// ============================================================================

/// Renders whole buffers through offline graphs
#[derive(Debug, Default)]
pub struct OfflineRenderer {
    builder: GraphBuilder,
    factory: OfflineFactory,
}

impl OfflineRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(factory: OfflineFactory) -> Self {
        Self {
            builder: GraphBuilder::new(),
            factory,
        }
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn factory(&self) -> &OfflineFactory {
        &self.factory
    }

    /// Render and return the processed buffer, or the input on failure
    pub fn render(
        &self,
        buffer: &SampleBuffer,
        settings: &EffectSettings,
        on_progress: &mut dyn FnMut(&str, f32),
    ) -> SampleBuffer {
        match self.try_render(buffer, settings, on_progress) {
            Ok(output) => output,
            Err(err) => {
                error!(error = %err, "offline render failed; returning input unchanged");
                buffer.clone()
            }
        }
    }

    /// Render, surfacing errors to the caller
    pub fn try_render(
        &self,
        buffer: &SampleBuffer,
        settings: &EffectSettings,
        on_progress: &mut dyn FnMut(&str, f32),
    ) -> Result<SampleBuffer> {
        on_progress("Initializing", 0.1);
        let mut graph = self.builder.build(&self.factory, buffer, settings)?;

        on_progress("Rendering", 0.2);
        graph.start()?;
        let total = graph.output_len().max(1);
        let mut output = SampleBuffer::silence(buffer.num_channels(), 0, buffer.sample_rate);
        while let Some(block) = graph.next_block()? {
            output.append(&block)?;
            let fraction = output.len() as f32 / total as f32;
            on_progress("Rendering", 0.2 + 0.8 * fraction.min(1.0));
        }

        let latency = graph.latency_samples();
        if latency > 0 {
            let tail = graph.flush(latency)?;
            output.append(&tail)?;
            output.drop_front(latency);
        }
        graph.dispose();

        debug!(frames = output.len(), latency, "offline render finished");
        on_progress("Complete", 1.0);
        Ok(output)
    }
}

/// Render `buffer` through a fresh offline graph
///
/// Returns the input unchanged if anything fails.
pub fn render_offline(
    buffer: &SampleBuffer,
    settings: &EffectSettings,
    on_progress: &mut dyn FnMut(&str, f32),
) -> SampleBuffer {
    OfflineRenderer::new().render(buffer, settings, on_progress)
}

// ============================================================================
// Engine
// ============================================================================

/// Caller-owned voice engine
///
/// Holds the current settings and at most one live preview graph. Installing
/// a graph disposes the previous one first, so two live graphs never feed
/// the same sink.
#[derive(Debug)]
pub struct VoiceEngine {
    settings: EffectSettings,
    tracker: ResourceTracker,
    preview: PreviewFactory,
    renderer: OfflineRenderer,
    live: Option<Graph>,
}

impl Default for VoiceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceEngine {
    pub fn new() -> Self {
        Self::with_settings(EffectSettings::default())
    }

    pub fn with_settings(settings: EffectSettings) -> Self {
        let tracker = ResourceTracker::new();
        Self {
            settings,
            preview: PreviewFactory::with_tracker(tracker.clone()),
            renderer: OfflineRenderer::with_factory(OfflineFactory::with_tracker(tracker.clone())),
            tracker,
            live: None,
        }
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    /// Replace every setting, pushing the change to the live graph
    pub fn set_settings(&mut self, settings: EffectSettings) {
        let patch = settings.to_patch();
        self.update_params(&patch);
    }

    /// Apply a partial update to the engine settings and the live graph
    pub fn update_params(&mut self, patch: &SettingsPatch) {
        let patch = patch.clamped();
        patch.apply_to(&mut self.settings);
        if let Some(graph) = self.live.as_mut() {
            graph.update_params(&patch);
        }
    }

    /// Nodes created by this engine and not yet disposed
    pub fn live_nodes(&self) -> usize {
        self.tracker.live_nodes()
    }

    /// Build a preview graph for `buffer` with the current settings
    pub fn build_graph(&self, buffer: &SampleBuffer) -> Result<Graph> {
        self.renderer
            .builder()
            .build(&self.preview, buffer, &self.settings)
    }

    /// Install `graph` as the live graph, disposing the previous one first
    pub fn install_graph(&mut self, graph: Graph) {
        self.dispose_graph();
        info!(stages = ?graph.stage_kinds(), "installing live graph");
        self.live = Some(graph);
    }

    /// Dispose and drop the live graph, if any
    pub fn dispose_graph(&mut self) {
        if let Some(mut graph) = self.live.take() {
            graph.dispose();
            debug!("live graph disposed");
        }
    }

    /// Build and install a preview graph in one step
    pub fn load(&mut self, buffer: &SampleBuffer) -> Result<()> {
        let graph = self.build_graph(buffer)?;
        self.install_graph(graph);
        Ok(())
    }

    pub fn live_graph(&self) -> Option<&Graph> {
        self.live.as_ref()
    }

    pub fn meter(&self) -> Option<MeterHandle> {
        self.live.as_ref().and_then(|g| g.meter().cloned())
    }

    /// Start the live graph and pump every block into `sink`
    ///
    /// The graph latency is drained with silence at the end so the tail is
    /// not cut. Returns the number of frames written.
    pub fn play(&mut self, sink: &mut dyn PlaybackSink) -> Result<usize> {
        let graph = self.live.as_mut().ok_or(VoxError::NoGraphInstalled)?;
        graph.start()?;

        let mut frames = 0;
        while let Some(block) = graph.next_block()? {
            sink.write_block(&block)?;
            frames += block.len();
        }
        let latency = graph.latency_samples();
        if latency > 0 {
            let tail = graph.flush(latency)?;
            sink.write_block(&tail)?;
            frames += tail.len();
        }
        sink.finish()?;
        Ok(frames)
    }

    /// Render `buffer` offline with the current settings
    pub fn render_offline(
        &self,
        buffer: &SampleBuffer,
        on_progress: &mut dyn FnMut(&str, f32),
    ) -> SampleBuffer {
        self.renderer.render(buffer, &self.settings, on_progress)
    }

    pub fn analyze_voice(&self, buffer: &SampleBuffer) -> Result<VoiceProfile> {
        self.renderer.builder().voice_analyzer().analyze(buffer)
    }

    /// Quality metrics for `buffer`, with the live graph latency when present
    pub fn voice_metrics(&self, buffer: &SampleBuffer) -> VoiceMetrics {
        let latency_ms = self
            .live
            .as_ref()
            .map(|g| g.latency_samples() as f64 * 1000.0 / buffer.sample_rate.max(1) as f64)
            .unwrap_or(0.0);
        VoiceMetrics::measure(buffer, latency_ms)
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        self.dispose_graph();
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
    use crate::engine::graph::StageKind;
    use pretty_assertions::assert_eq;

    fn quiet_progress() -> impl FnMut(&str, f32) {
        |_: &str, _: f32| {}
    }

    #[test]
    fn test_all_disabled_quiet_signal_is_bit_identical() {
        // -46 dBFS stays below the compressor knee and the limiter ceiling
        let input = generate_test_tone(300.0, 0.005, 0.5, 48000);
        let output = render_offline(&input, &EffectSettings::all_disabled(), &mut quiet_progress());
        assert_eq!(output, input);
    }

    #[test]
    fn test_all_disabled_loud_signal_is_compressed() {
        let input = generate_test_tone(300.0, 0.9, 0.5, 48000);
        let output = render_offline(&input, &EffectSettings::all_disabled(), &mut quiet_progress());

        assert_eq!(output.len(), input.len());
        let tail_peak = peak_linear(&output.channel(0)[12000..]);
        assert!(tail_peak < 0.9 * 0.7, "peak {} not reduced", tail_peak);
    }

    #[test]
    fn test_latency_is_compensated() {
        let input = generate_voice_like(150.0, 0.5, 48000);
        let settings = EffectSettings {
            enable_ai_enhancement: false,
            ..EffectSettings::default()
        };
        let output = render_offline(&input, &settings, &mut quiet_progress());
        assert_eq!(output.len(), input.len());
    }

    #[test]
    fn test_progress_sequence() {
        let input = generate_test_tone(440.0, 0.3, 0.5, 48000);
        let mut calls: Vec<(String, f32)> = Vec::new();
        render_offline(&input, &EffectSettings::default(), &mut |stage: &str, p: f32| {
            calls.push((stage.to_string(), p))
        });

        assert_eq!(calls.first().unwrap(), &("Initializing".to_string(), 0.1));
        assert_eq!(calls[1], ("Rendering".to_string(), 0.2));
        assert_eq!(calls.last().unwrap(), &("Complete".to_string(), 1.0));
        assert!(calls.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_failed_render_returns_input() {
        let empty = SampleBuffer::silence(1, 0, 48000);
        let output = render_offline(&empty, &EffectSettings::default(), &mut quiet_progress());
        assert_eq!(output, empty);

        let renderer = OfflineRenderer::new();
        let err = renderer
            .try_render(&empty, &EffectSettings::default(), &mut quiet_progress())
            .unwrap_err();
        assert!(matches!(err, VoxError::EmptyAudio));
    }

    #[test]
    fn test_install_disposes_previous_graph() {
        let mut engine = VoiceEngine::with_settings(EffectSettings::all_disabled());
        let buffer = generate_test_tone(440.0, 0.3, 0.2, 48000);

        engine.load(&buffer).unwrap();
        // compressor, limiter, meter
        assert_eq!(engine.live_nodes(), 3);
        engine.load(&buffer).unwrap();
        assert_eq!(engine.live_nodes(), 3);

        engine.dispose_graph();
        assert_eq!(engine.live_nodes(), 0);
        assert!(engine.live_graph().is_none());
    }

    #[test]
    fn test_play_consumes_the_source_once() {
        let mut engine = VoiceEngine::with_settings(EffectSettings::all_disabled());
        let buffer = generate_test_tone(440.0, 0.3, 0.2, 48000);

        let mut sink = BufferSink::new();
        assert!(matches!(engine.play(&mut sink), Err(VoxError::NoGraphInstalled)));

        engine.load(&buffer).unwrap();
        let frames = engine.play(&mut sink).unwrap();
        assert_eq!(frames, buffer.len());
        assert!(sink.is_finished());
        assert_eq!(sink.len(), buffer.len());
        assert!(engine.meter().unwrap().reading().blocks > 0);

        let mut again = BufferSink::new();
        assert!(matches!(
            engine.play(&mut again),
            Err(VoxError::SourceAlreadyStarted)
        ));
    }

    #[test]
    fn test_update_params_reaches_live_graph() {
        let mut engine = VoiceEngine::with_settings(EffectSettings::all_disabled());
        let buffer = generate_test_tone(440.0, 0.3, 0.2, 48000);
        engine.load(&buffer).unwrap();

        engine.update_params(&SettingsPatch {
            reverb_mix: Some(0.8),
            ..SettingsPatch::default()
        });
        assert_eq!(engine.settings().reverb_mix, 0.8);
        assert_eq!(engine.live_graph().unwrap().settings().reverb_mix, 0.8);
        // Structure is fixed at build time
        assert_eq!(
            engine.live_graph().unwrap().processing_stages(),
            vec![StageKind::Compressor, StageKind::Limiter]
        );
    }

    #[test]
    fn test_engine_passthroughs() {
        let engine = VoiceEngine::new();
        let voice = generate_voice_like(120.0, 0.5, 48000);

        let profile = engine.analyze_voice(&voice).unwrap();
        assert!((profile.fundamental_freq - 120.0).abs() < 6.0);

        let rendered = engine.render_offline(&voice, &mut quiet_progress());
        assert_eq!(rendered.len(), voice.len());
        assert!(rendered.is_finite());

        let metrics = engine.voice_metrics(&rendered);
        assert_eq!(metrics.processing_latency_ms, 0.0);
    }
}
