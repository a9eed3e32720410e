use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::speech::context::{SpeechContext, SpeechEvent};
use crate::speech::models::{load_models, CommandModels, ModelLoader};
use crate::speech::processor::SpeechProcessor;
use crate::speech::processors::cascade::FeatureCascade;

const DEFAULT_MEL_LENGTH_MS: u32 = 10;

/// Listens for the wakeword while the pipeline is idle and emits `ACTIVATE`
/// when the detector's posterior crosses `wake_threshold`.
///
/// Inference only runs while the VAD reports speech; the windows are cleared
/// whenever speech ends so every utterance is scored on its own.
pub struct WakewordTrigger {
    cascade: FeatureCascade,
    threshold: f32,
    vad_active: bool,
}

impl WakewordTrigger {
    pub fn create(config: &SpeechConfig, loader: &dyn ModelLoader) -> Result<Self> {
        let base_url = config
            .base_wakeword_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(SpeechError::MissingWakewordUrl)?;
        if config.sample_rate == 0 {
            return Err(SpeechError::InvalidSampleRate);
        }
        let models = load_models(loader, base_url, config.fft_width)?;
        Self::new(models, config)
    }

    pub fn new(models: CommandModels, config: &SpeechConfig) -> Result<Self> {
        Ok(Self {
            cascade: FeatureCascade::new(models, config, DEFAULT_MEL_LENGTH_MS)?,
            threshold: config.wake_threshold,
            vad_active: false,
        })
    }

    fn detect(&mut self, context: &mut SpeechContext) -> Result<()> {
        let posteriors = self.cascade.detect()?;
        let confidence = posteriors.into_iter().fold(f32::NEG_INFINITY, f32::max);
        tracing::trace!(confidence, "wakeword posterior");
        if confidence > self.threshold {
            context.dispatch(SpeechEvent::activate().with_confidence(confidence));
        }
        Ok(())
    }
}

impl SpeechProcessor for WakewordTrigger {
    fn process(&mut self, context: &mut SpeechContext, frame: &[f32]) -> Result<()> {
        for &sample in frame {
            if context.is_active {
                break;
            }
            if self.cascade.push_sample(sample, context.is_speech)? {
                self.detect(context)?;
            }
        }

        if self.vad_active && !context.is_speech {
            self.reset();
        }
        self.vad_active = context.is_speech;
        Ok(())
    }

    fn reset(&mut self) {
        self.cascade.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::context::EventType;
    use crate::speech::models::testing::{MeanDetect, MeanFilter, ScriptedDetect, SumEncoder};
    use crate::speech::models::UnavailableLoader;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};

    // hop = 8 samples, sample window = 16
    fn config() -> SpeechConfig {
        SpeechConfig {
            sample_rate: 8000,
            fft_width: 16,
            hop_length: 1,
            wake_threshold: 0.5,
            base_wakeword_url: Some("https://example.com/ww".to_string()),
            ..Default::default()
        }
    }

    fn models(detect: Box<dyn crate::speech::models::Model>) -> CommandModels {
        CommandModels {
            filter: Box::new(MeanFilter {
                fft_width: 16,
                width: 4,
            }),
            encode: Box::new(SumEncoder {
                mel_frames: Some(2),
                mel_width: 4,
                width: 3,
                state_width: 2,
            }),
            detect,
        }
    }

    fn context() -> (SpeechContext, mpsc::Receiver<SpeechEvent>) {
        let (tx, rx) = mpsc::channel();
        let context = SpeechContext::new(
            config(),
            Box::new(move |event| {
                let _ = tx.send(event.clone());
            }),
        );
        (context, rx)
    }

    #[test]
    fn test_requires_url() {
        let mut speech = config();
        speech.base_wakeword_url = None;
        let err = WakewordTrigger::create(&speech, &UnavailableLoader)
            .err()
            .unwrap();
        assert!(matches!(err, SpeechError::MissingWakewordUrl));
        assert_eq!(err.to_string(), "wakeword URL required");

        speech.base_wakeword_url = Some("https://example.com/ww".to_string());
        let err = WakewordTrigger::create(&speech, &UnavailableLoader)
            .err()
            .unwrap();
        assert!(matches!(err, SpeechError::ModelLoad(_)));
    }

    #[test]
    fn test_activates_above_threshold() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detect = ScriptedDetect {
            encode_frames: 3,
            encode_width: 3,
            outputs: vec![vec![0.2], vec![0.9]],
            calls: calls.clone(),
        };
        let mut trigger = WakewordTrigger::new(models(Box::new(detect)), &config()).unwrap();
        let (mut context, rx) = context();
        context.is_speech = true;

        trigger.process(&mut context, &[0.1; 16]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());

        trigger.process(&mut context, &[0.1; 8]).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::Activate);
        assert_eq!(event.confidence, Some(0.9));
        assert!(!context.is_active, "activation state is left to the host");
    }

    #[test]
    fn test_threshold_is_strict() {
        let detect = ScriptedDetect {
            encode_frames: 3,
            encode_width: 3,
            outputs: vec![vec![0.5]],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let mut trigger = WakewordTrigger::new(models(Box::new(detect)), &config()).unwrap();
        let (mut context, rx) = context();
        context.is_speech = true;
        trigger.process(&mut context, &[0.1; 64]).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_inference_without_speech_or_while_active() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detect = ScriptedDetect {
            encode_frames: 3,
            encode_width: 3,
            outputs: vec![vec![0.9]],
            calls: calls.clone(),
        };
        let mut trigger = WakewordTrigger::new(models(Box::new(detect)), &config()).unwrap();
        let (mut context, rx) = context();

        trigger.process(&mut context, &[0.1; 64]).unwrap();
        context.is_active = true;
        context.is_speech = true;
        trigger.process(&mut context, &[0.1; 64]).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_speech_end_resets_to_fresh_state() {
        let detect = || {
            Box::new(MeanDetect {
                encode_frames: 3,
                encode_width: 3,
            })
        };
        let mut used = WakewordTrigger::new(models(detect()), &config()).unwrap();
        let mut fresh = WakewordTrigger::new(models(detect()), &config()).unwrap();
        let (mut context, _rx) = context();

        context.is_speech = true;
        for i in 0..5 {
            used.process(&mut context, &[0.05 * i as f32; 16]).unwrap();
        }
        assert_ne!(used.cascade.snapshot(), fresh.cascade.snapshot());

        context.is_speech = false;
        used.process(&mut context, &[]).unwrap();
        assert_eq!(used.cascade.snapshot(), fresh.cascade.snapshot());

        // the next utterance scores exactly like one on a fresh trigger
        let (tx, rx) = mpsc::channel();
        let (fresh_tx, fresh_rx) = mpsc::channel();
        context = SpeechContext::new(
            config(),
            Box::new(move |event| {
                let _ = tx.send(event.confidence);
            }),
        );
        let mut fresh_context = SpeechContext::new(
            config(),
            Box::new(move |event| {
                let _ = fresh_tx.send(event.confidence);
            }),
        );
        context.is_speech = true;
        fresh_context.is_speech = true;
        for _ in 0..4 {
            used.process(&mut context, &[0.4; 16]).unwrap();
            fresh.process(&mut fresh_context, &[0.4; 16]).unwrap();
        }
        let used_scores: Vec<_> = rx.try_iter().collect();
        let fresh_scores: Vec<_> = fresh_rx.try_iter().collect();
        assert!(!used_scores.is_empty());
        assert_eq!(used_scores, fresh_scores);
    }
}
