//! Error handling for Voxform
//!
//! Every error carries a stable code, a recoverability flag and a
//! human-readable message so callers can surface status text alongside the
//! structured detail.

use thiserror::Error;

/// Result type alias for Voxform operations
pub type Result<T> = std::result::Result<T, VoxError>;

/// Main error type for Voxform operations
#[derive(Error, Debug)]
pub enum VoxError {
    // Audio Data Errors
    #[error("Invalid audio: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples")]
    EmptyAudio,

    #[error("Voice analysis failed: {reason}")]
    AnalysisFailed { reason: String },

    // Parameter Errors
    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Graph Lifecycle Errors
    #[error("Graph source has already been started")]
    SourceAlreadyStarted,

    #[error("Graph source has not been started")]
    SourceNotStarted,

    #[error("Graph has been disposed")]
    GraphDisposed,

    #[error("No graph is installed")]
    NoGraphInstalled,

    // Processing Errors
    #[error("Processing error in {stage}: {reason}")]
    ProcessingError { stage: String, reason: String },

    #[error("DSP overflow: {stage} produced invalid audio (NaN/Inf)")]
    DspOverflow { stage: String },

    // Preset Errors
    #[error("Preset not found: {id}")]
    PresetNotFound { id: String },

    #[error("Built-in preset '{id}' cannot be modified or deleted")]
    BuiltInPreset { id: String },

    // Task Errors
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Task payload does not match task type '{kind}'")]
    PayloadMismatch { kind: String },

    // Codec Errors
    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VoxError {
    /// Shorthand for an `InvalidAudio` error without a source.
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        VoxError::InvalidAudio {
            reason: reason.into(),
            source: None,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            VoxError::InvalidAudio { .. } => "INVALID_AUDIO",
            VoxError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            VoxError::EmptyAudio => "EMPTY_AUDIO",
            VoxError::AnalysisFailed { .. } => "ANALYSIS_FAILED",
            VoxError::InvalidParameter { .. } => "INVALID_PARAMETER",
            VoxError::SourceAlreadyStarted => "SOURCE_ALREADY_STARTED",
            VoxError::SourceNotStarted => "SOURCE_NOT_STARTED",
            VoxError::GraphDisposed => "GRAPH_DISPOSED",
            VoxError::NoGraphInstalled => "NO_GRAPH_INSTALLED",
            VoxError::ProcessingError { .. } => "PROCESSING_ERROR",
            VoxError::DspOverflow { .. } => "DSP_OVERFLOW",
            VoxError::PresetNotFound { .. } => "PRESET_NOT_FOUND",
            VoxError::BuiltInPreset { .. } => "BUILT_IN_PRESET",
            VoxError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            VoxError::PayloadMismatch { .. } => "PAYLOAD_MISMATCH",
            VoxError::Wav(_) => "WAV_ERROR",
            VoxError::Io(_) => "IO_ERROR",
            VoxError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the pipeline usable: the stage or request is
    /// skipped and processing continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VoxError::InvalidParameter { .. }
                | VoxError::AnalysisFailed { .. }
                | VoxError::ProcessingError { .. }
                | VoxError::DspOverflow { .. }
                | VoxError::PresetNotFound { .. }
                | VoxError::BuiltInPreset { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            VoxError::InvalidAudio { .. } | VoxError::UnsupportedFormat { .. } => vec![
                "Convert the file to 16- or 24-bit PCM WAV",
                "Check that the file plays in another application",
            ],
            VoxError::EmptyAudio => vec!["Load a recording that contains audio"],
            VoxError::AnalysisFailed { .. } => vec![
                "Static enhancement was used instead of adaptive enhancement",
                "Use a longer recording with clear speech",
            ],
            VoxError::DspOverflow { .. } => vec![
                "The effect settings may be too extreme",
                "Stage has been bypassed to prevent audio corruption",
            ],
            VoxError::SourceAlreadyStarted | VoxError::GraphDisposed => {
                vec!["Build a new graph for each playback"]
            }
            VoxError::BuiltInPreset { .. } => vec!["Duplicate the preset and edit the copy"],
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            VoxError::EmptyAudio => "There is no audio to process.".to_string(),
            VoxError::AnalysisFailed { reason } => format!(
                "Couldn't analyze the voice ({}), so a basic enhancement was applied instead.",
                reason
            ),
            VoxError::DspOverflow { stage } => format!(
                "The {} stage produced invalid audio and was bypassed.",
                stage
            ),
            VoxError::SourceAlreadyStarted => {
                "This preview has already played. Start a new preview to listen again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = VoxError::DspOverflow {
            stage: "reverb".to_string(),
        };
        assert_eq!(err.error_code(), "DSP_OVERFLOW");
        assert!(err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_lifecycle_errors_are_not_recoverable() {
        assert!(!VoxError::SourceAlreadyStarted.is_recoverable());
        assert!(!VoxError::GraphDisposed.is_recoverable());
        assert_eq!(
            VoxError::SourceAlreadyStarted.error_code(),
            "SOURCE_ALREADY_STARTED"
        );
    }

    #[test]
    fn test_friendly_message_mentions_stage() {
        let err = VoxError::DspOverflow {
            stage: "delay".to_string(),
        };
        assert!(err.friendly_message().contains("delay"));
    }
}
