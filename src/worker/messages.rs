// Messages crossing the worker boundary, with their JSON wire shapes:
//
//   inbound   {"config": {"speechConfig": {...}, "stages": ["vadTrigger", ...]}}
//             {"audio": [0.0, ...], "vad": true}
//   outbound  {"initialized": true}
//             {"type": "ACTIVATE", "confidence": 0.9}

use serde::{Deserialize, Serialize};

use crate::config::SpeechConfig;
use crate::speech::context::SpeechEvent;
use crate::speech::processor::Stage;

/// One-time initialization payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub speech_config: SpeechConfig,
    pub stages: Vec<Stage>,
}

/// Host -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Config { config: WorkerConfig },
    Audio { audio: Vec<f32>, vad: bool },
}

/// Worker -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerEvent {
    /// Sent once, after every stage was created.
    Initialized { initialized: bool },
    Event(SpeechEvent),
}

impl WorkerEvent {
    pub fn initialized() -> Self {
        WorkerEvent::Initialized { initialized: true }
    }
}
