//! Error types for the speech pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SpeechError>;

/// Errors raised while building or running a speech pipeline
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Keyword recognizer created without a model base URL
    #[error("keyword URL required")]
    MissingKeywordUrl,

    /// Keyword recognizer created without class labels
    #[error("keyword classes required")]
    MissingKeywordClasses,

    /// Wakeword trigger created without a model base URL
    #[error("wakeword URL required")]
    MissingWakewordUrl,

    #[error("sampleRate is required")]
    InvalidSampleRate,

    /// A loaded model does not declare a shape the stage needs
    #[error("model shape error: {0}")]
    ModelShape(String),

    #[error("unable to load models: {0:#}")]
    ModelLoad(anyhow::Error),

    /// A filter/encode/detect call failed mid-frame
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The VAD was asked to score audio before `connect`
    #[error("VAD is not connected")]
    VadNotConnected,

    /// The audio source runs at a different rate than the pipeline expects
    #[error("unsupported_browser: requested sample rate {requested} Hz, source provides {actual} Hz")]
    UnsupportedSampleRate { requested: u32, actual: u32 },

    /// Stage creation failed inside the worker
    #[error("pipeline initialization failed: {0}")]
    Initialization(String),

    /// The worker thread is gone
    #[error("speech worker terminated")]
    WorkerTerminated,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
