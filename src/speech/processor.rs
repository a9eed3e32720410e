//! Stage trait and the factory that builds a configured stage list.

use serde::{Deserialize, Serialize};

use crate::config::SpeechConfig;
use crate::error::Result;
use crate::speech::context::SpeechContext;
use crate::speech::models::ModelLoader;
use crate::speech::processors::{KeywordRecognizer, VadTrigger, WakewordTrigger};

/// One step of the per-frame chain. Stages run in order on every frame and
/// communicate only through the shared context.
pub trait SpeechProcessor: Send {
    fn process(&mut self, context: &mut SpeechContext, frame: &[f32]) -> Result<()>;

    /// Clears any per-utterance state.
    fn reset(&mut self);
}

/// Stage identifiers accepted in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Stage {
    #[serde(rename = "vadTrigger")]
    #[value(name = "vad-trigger")]
    VadTrigger,
    #[serde(rename = "wakeword")]
    #[value(name = "wakeword")]
    WakewordTrigger,
    #[serde(rename = "keyword")]
    #[value(name = "keyword")]
    KeywordRecognizer,
}

pub fn create_stage(
    stage: Stage,
    config: &SpeechConfig,
    loader: &dyn ModelLoader,
) -> Result<Box<dyn SpeechProcessor>> {
    Ok(match stage {
        Stage::VadTrigger => Box::new(VadTrigger::new()),
        Stage::WakewordTrigger => Box::new(WakewordTrigger::create(config, loader)?),
        Stage::KeywordRecognizer => Box::new(KeywordRecognizer::create(config, loader)?),
    })
}

/// Builds every stage in order. Any failure discards the stages built so far.
pub fn create_stages(
    stages: &[Stage],
    config: &SpeechConfig,
    loader: &dyn ModelLoader,
) -> Result<Vec<Box<dyn SpeechProcessor>>> {
    stages
        .iter()
        .map(|&stage| {
            tracing::debug!(?stage, "creating stage");
            create_stage(stage, config, loader)
        })
        .collect()
}
