pub mod analyser;
pub mod convert;
pub mod ring_buffer;
pub mod vad;
