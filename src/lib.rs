//! Frame-synchronous speech pipeline.
//!
//! A host-side voice activity detector scores fixed-size audio frames and
//! hands them, with their VAD flag, to a worker thread that runs an ordered
//! list of stages: a VAD trigger, a wakeword trigger and a keyword
//! recognizer. Stages report back through [`speech::SpeechEvent`]s.

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod speech;
pub mod worker;

pub use config::Config;
pub use error::{Result, SpeechError};
pub use pipeline::{PipelineHandle, PipelineProfile, SpeechPipeline};
pub use speech::{SpeechEvent, Stage};
