pub mod context;
pub mod models;
pub mod processor;
pub mod processors;

pub use context::{EventType, SpeechContext, SpeechEvent};
pub use processor::{create_stages, SpeechProcessor, Stage};
