use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::speech::context::{SpeechContext, SpeechEvent};
use crate::speech::models::{load_models, CommandModels, ModelLoader};
use crate::speech::processor::SpeechProcessor;
use crate::speech::processors::cascade::FeatureCascade;

const DEFAULT_MEL_LENGTH_MS: u32 = 110;

/// Classifies a short command once the active period ends.
///
/// Features are computed while the pipeline is active. When it goes inactive
/// the encode window is classified: `RECOGNIZE` with the best label if its
/// posterior beats `keyword_threshold`, `TIMEOUT` otherwise.
pub struct KeywordRecognizer {
    cascade: FeatureCascade,
    classes: Vec<String>,
    threshold: f32,
    vad_active: bool,
}

impl KeywordRecognizer {
    pub fn create(config: &SpeechConfig, loader: &dyn ModelLoader) -> Result<Self> {
        let base_url = config
            .base_keyword_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(SpeechError::MissingKeywordUrl)?;
        if config.keyword_classes.is_empty() {
            return Err(SpeechError::MissingKeywordClasses);
        }
        if config.sample_rate == 0 {
            return Err(SpeechError::InvalidSampleRate);
        }
        let models = load_models(loader, base_url, config.fft_width)?;
        Self::new(models, config)
    }

    pub fn new(models: CommandModels, config: &SpeechConfig) -> Result<Self> {
        Ok(Self {
            cascade: FeatureCascade::new(models, config, DEFAULT_MEL_LENGTH_MS)?,
            classes: config.keyword_classes.clone(),
            threshold: config.keyword_threshold,
            vad_active: false,
        })
    }

    fn classify(&mut self, context: &mut SpeechContext) -> Result<()> {
        let posteriors = self.cascade.detect()?;
        let best = posteriors
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (index, p)| match best {
                Some((_, max)) if max >= p => best,
                _ => Some((index, p)),
            });
        let Some((index, confidence)) = best else {
            return Err(SpeechError::ModelShape(
                "detect model returned no posteriors".to_string(),
            ));
        };
        let label = self.classes.get(index).ok_or_else(|| {
            SpeechError::ModelShape(format!(
                "detect model has {} classes, {} labels configured",
                posteriors.len(),
                self.classes.len()
            ))
        })?;

        tracing::debug!(label = %label, confidence, "keyword classified");
        let event = if confidence > self.threshold {
            SpeechEvent::recognize(label.clone(), confidence)
        } else {
            SpeechEvent::timeout()
        };
        context.dispatch(event);
        self.reset();
        Ok(())
    }
}

impl SpeechProcessor for KeywordRecognizer {
    fn process(&mut self, context: &mut SpeechContext, frame: &[f32]) -> Result<()> {
        for &sample in frame {
            self.cascade.push_sample(sample, context.is_active)?;
        }

        if !context.is_active && self.vad_active {
            self.classify(context)?;
        }
        self.vad_active = context.is_active;
        Ok(())
    }

    fn reset(&mut self) {
        self.cascade.reset();
    }
}
