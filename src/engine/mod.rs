//! Audio Engine Module
//!
//! Core voice processing engine including:
//! - Sample buffer management
//! - Effect settings and parameter patches
//! - Graph construction for preview and offline rendering
//! - The caller-owned voice engine and offline renderer
//! - WAV decode/encode and export shaping
//! - The offline task queue

pub mod buffer;
pub mod core;
pub mod graph;
pub mod io;
pub mod settings;
pub mod tasks;

pub use buffer::SampleBuffer;
pub use self::core::{render_offline, BufferSink, OfflineRenderer, PlaybackSink, VoiceEngine};
pub use graph::{
    Graph, GraphBuilder, GraphContext, NodeFactory, OfflineFactory, PreviewFactory,
    ResourceTracker, StageKind,
};
pub use io::{
    decode_wav, export_audio, export_bytes, generate_test_tone, generate_voice_like,
    import_audio, ExportFormat, ExportOptions, ExportedAudio, WavEncoder,
};
pub use settings::{EffectSettings, PerformanceMode, SettingsIssue, SettingsPatch};
pub use tasks::{
    BatchItem, BatchOutput, ProcessingTask, ProgressCallback, TaskId, TaskKind, TaskOutput,
    TaskPayload, TaskPriority, TaskQueue, TaskStats, TaskStatus,
};
