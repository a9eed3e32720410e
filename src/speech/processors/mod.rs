pub mod cascade;
pub mod keyword;
pub mod vad_trigger;
pub mod wakeword;

pub use keyword::KeywordRecognizer;
pub use vad_trigger::VadTrigger;
pub use wakeword::WakewordTrigger;
