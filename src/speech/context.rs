//! Shared per-pipeline state and the events stages emit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SpeechConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Activate,
    Deactivate,
    Timeout,
    Recognize,
    Error,
}

/// An event delivered to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpeechEvent {
    fn of(event_type: EventType) -> Self {
        Self {
            event_type,
            transcript: None,
            confidence: None,
            error: None,
        }
    }

    pub fn activate() -> Self {
        Self::of(EventType::Activate)
    }

    pub fn deactivate() -> Self {
        Self::of(EventType::Deactivate)
    }

    pub fn timeout() -> Self {
        Self::of(EventType::Timeout)
    }

    pub fn recognize(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            transcript: Some(transcript.into()),
            confidence: Some(confidence),
            ..Self::of(EventType::Recognize)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::of(EventType::Error)
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Callback through which stages hand events to the host.
pub type EventSink = Box<dyn Fn(&SpeechEvent) + Send>;

/// Mutable record threaded through every stage, once per frame.
pub struct SpeechContext {
    pub config: SpeechConfig,
    /// Downstream consumers (e.g. ASR) should receive audio.
    pub is_active: bool,
    /// VAD flag for the frame being processed.
    pub is_speech: bool,
    pub frames_processed: u64,
    pub last_event: Option<SpeechEvent>,
    sink: EventSink,
}

impl SpeechContext {
    pub fn new(config: SpeechConfig, sink: EventSink) -> Self {
        Self {
            config,
            is_active: false,
            is_speech: false,
            frames_processed: 0,
            last_event: None,
            sink,
        }
    }

    /// Emits an event to the host and records it as the last event.
    pub fn dispatch(&mut self, event: SpeechEvent) {
        tracing::debug!(event_type = ?event.event_type, frame = self.frames_processed, "dispatch");
        (self.sink)(&event);
        self.last_event = Some(event);
    }
}

impl fmt::Debug for SpeechContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechContext")
            .field("is_active", &self.is_active)
            .field("is_speech", &self.is_speech)
            .field("frames_processed", &self.frames_processed)
            .field("last_event", &self.last_event)
            .finish()
    }
}
