// Host side of the speech pipeline.
//
// The host owns the VAD: audio is cut into fixed-size frames, the first
// frames calibrate the noise floor, and every later frame is scored and
// posted to the worker together with its VAD flag. Events come back on a
// channel in the order their frames were processed.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::audio::vad::{VadProcessor, VoiceActivityDetector};
use crate::config::Config;
use crate::error::{Result, SpeechError};
use crate::speech::context::{EventType, SpeechEvent};
use crate::speech::models::ModelLoader;
use crate::speech::processor::Stage;
use crate::worker::messages::{WorkerConfig, WorkerEvent, WorkerMessage};
use crate::worker::{spawn_worker, WorkerHandle};

/// Preset stage lists.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PipelineProfile {
    /// VAD-triggered activation followed by keyword classification.
    #[default]
    Keyword,
    /// Wakeword-triggered activation.
    Wakeword,
}

impl PipelineProfile {
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            PipelineProfile::Keyword => &[Stage::VadTrigger, Stage::KeywordRecognizer],
            PipelineProfile::Wakeword => &[Stage::WakewordTrigger],
        }
    }
}

/// A configured, not yet started pipeline.
pub struct SpeechPipeline {
    config: Config,
    stages: Vec<Stage>,
    vad: Box<dyn VadProcessor>,
}

impl SpeechPipeline {
    /// Builds a pipeline for a source delivering audio at `source_sample_rate`.
    /// Resampling is not supported, so the rates must match.
    pub fn new(config: Config, source_sample_rate: u32) -> Result<Self> {
        config.validate()?;
        if config.speech.sample_rate != source_sample_rate {
            return Err(SpeechError::UnsupportedSampleRate {
                requested: config.speech.sample_rate,
                actual: source_sample_rate,
            });
        }

        let mut vad = VoiceActivityDetector::new(
            &config.vad,
            config.speech.fft_width,
            config.speech.sample_rate,
        );
        vad.connect(config.speech.frame_size);

        Ok(Self {
            stages: config.pipeline.resolved_stages(),
            config,
            vad: Box::new(vad),
        })
    }

    /// Replaces the built-in detector.
    pub fn with_vad(mut self, vad: Box<dyn VadProcessor>) -> Self {
        self.vad = vad;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Spawns the worker and waits for it to finish creating the stages.
    /// A stage creation failure tears the worker down and is returned.
    pub fn start(self, loader: Arc<dyn ModelLoader>) -> Result<PipelineHandle> {
        let (events_tx, events) = mpsc::channel();
        let worker = spawn_worker(loader, events_tx)?;
        worker.post(WorkerMessage::Config {
            config: WorkerConfig {
                speech_config: self.config.speech.clone(),
                stages: self.stages.clone(),
            },
        })?;

        loop {
            match events.recv() {
                Ok(WorkerEvent::Initialized { .. }) => break,
                Ok(WorkerEvent::Event(event)) if event.event_type == EventType::Error => {
                    worker.terminate()?;
                    return Err(SpeechError::Initialization(
                        event.error.unwrap_or_default(),
                    ));
                }
                Ok(WorkerEvent::Event(event)) => {
                    tracing::debug!(?event, "event before initialization");
                }
                Err(_) => return Err(SpeechError::WorkerTerminated),
            }
        }

        let calibration_frames = self.vad.calibration_frames();
        tracing::info!(
            stages = ?self.stages,
            calibration_frames,
            "speech pipeline started"
        );
        Ok(PipelineHandle {
            worker: Some(worker),
            events,
            vad: self.vad,
            frame_size: self.config.speech.frame_size,
            pending: Vec::with_capacity(self.config.speech.frame_size),
            calibration_frames,
            frames_sent: 0,
            halted: false,
        })
    }
}

/// A running pipeline.
pub struct PipelineHandle {
    worker: Option<WorkerHandle>,
    events: Receiver<WorkerEvent>,
    vad: Box<dyn VadProcessor>,
    frame_size: usize,
    pending: Vec<f32>,
    calibration_frames: usize,
    frames_sent: u64,
    halted: bool,
}

impl PipelineHandle {
    /// Feeds captured samples. Complete frames are scored and sent at once;
    /// a trailing partial frame waits for more audio.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<()> {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            self.push_frame(frame)?;
        }
        Ok(())
    }

    /// Zero-pads and sends any partial frame.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(self.frame_size, 0.0);
        self.push_frame(frame)
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration_frames > 0
    }

    /// Frames posted to the worker so far, excluding calibration frames.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// True once an `ERROR` event has been received. The worker processes
    /// nothing after an error, so further audio is refused.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Returns every event that has already arrived.
    pub fn try_events(&mut self) -> Vec<SpeechEvent> {
        let messages: Vec<WorkerEvent> = self.events.try_iter().collect();
        messages
            .into_iter()
            .filter_map(|message| self.observe(message))
            .collect()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_event(&mut self, timeout: Duration) -> Option<SpeechEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(message) => {
                    if let Some(event) = self.observe(message) {
                        return Some(event);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Terminates the worker once it has processed every frame already sent,
    /// and returns the events not yet received.
    pub fn stop(mut self) -> Result<Vec<SpeechEvent>> {
        if let Some(worker) = self.worker.take() {
            worker.terminate()?;
        }
        tracing::info!(frames = self.frames_sent, "speech pipeline stopped");
        Ok(self.try_events())
    }

    fn observe(&mut self, message: WorkerEvent) -> Option<SpeechEvent> {
        let event = into_event(message)?;
        if event.event_type == EventType::Error && !self.halted {
            tracing::warn!(error = ?event.error, "speech worker halted");
            self.halted = true;
        }
        Some(event)
    }

    fn push_frame(&mut self, frame: Vec<f32>) -> Result<()> {
        if self.halted {
            // dropping the handle joins the worker
            self.worker = None;
            return Err(SpeechError::WorkerTerminated);
        }
        if self.calibration_frames > 0 {
            self.vad.observe_noise(&frame)?;
            self.calibration_frames -= 1;
            if self.calibration_frames == 0 {
                self.vad.finish_calibration();
            }
            return Ok(());
        }

        let status = self.vad.process(&frame)?;
        if status.changed {
            tracing::debug!(active = status.active, frame = self.frames_sent, "VAD changed");
        }
        let worker = self.worker.as_ref().ok_or(SpeechError::WorkerTerminated)?;
        worker.post(WorkerMessage::Audio {
            audio: frame,
            vad: status.active,
        })?;
        self.frames_sent += 1;
        Ok(())
    }
}

fn into_event(message: WorkerEvent) -> Option<SpeechEvent> {
    match message {
        WorkerEvent::Event(event) => Some(event),
        WorkerEvent::Initialized { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::VadStatus;
    use crate::speech::models::testing::{FailingModel, MeanFilter, SumEncoder};
    use crate::speech::models::{CommandModels, ModelUrls, UnavailableLoader};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A test VAD that considers any frame whose first sample is non-zero as speech.
    struct TestVad {
        calibration: usize,
        observed: Arc<AtomicUsize>,
        active: bool,
    }

    impl TestVad {
        fn new(calibration: usize) -> (Self, Arc<AtomicUsize>) {
            let observed = Arc::new(AtomicUsize::new(0));
            let vad = Self {
                calibration,
                observed: observed.clone(),
                active: false,
            };
            (vad, observed)
        }
    }

    impl VadProcessor for TestVad {
        fn process(&mut self, samples: &[f32]) -> Result<VadStatus> {
            let active = samples.first().map_or(false, |&s| s != 0.0);
            let changed = active != self.active;
            self.active = active;
            Ok(VadStatus { active, changed })
        }

        fn calibration_frames(&self) -> usize {
            self.calibration
        }

        fn observe_noise(&mut self, _samples: &[f32]) -> Result<()> {
            self.observed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(stages: Vec<Stage>) -> Config {
        let mut config = Config::default();
        config.speech.frame_size = 4;
        config.pipeline.stages = Some(stages);
        config
    }

    fn wait_for(handle: &mut PipelineHandle, count: usize) -> Vec<EventType> {
        (0..count)
            .filter_map(|_| handle.recv_event(Duration::from_secs(5)))
            .map(|event| event.event_type)
            .collect()
    }

    #[test]
    fn test_profile_stages() {
        assert_eq!(
            PipelineProfile::Keyword.stages(),
            &[Stage::VadTrigger, Stage::KeywordRecognizer]
        );
        assert_eq!(PipelineProfile::Wakeword.stages(), &[Stage::WakewordTrigger]);

        let pipeline = SpeechPipeline::new(Config::default(), 16000).unwrap();
        assert_eq!(pipeline.stages(), PipelineProfile::Keyword.stages());
    }

    #[test]
    fn test_rejects_mismatched_sample_rate() {
        let err = SpeechPipeline::new(Config::default(), 44100).err().unwrap();
        assert!(matches!(
            err,
            SpeechError::UnsupportedSampleRate {
                requested: 16000,
                actual: 44100
            }
        ));
        assert!(err.to_string().starts_with("unsupported_browser"));
    }

    #[test]
    fn test_pipeline_detects_speech_and_silence() {
        let (vad, _) = TestVad::new(0);
        let pipeline = SpeechPipeline::new(config(vec![Stage::VadTrigger]), 16000)
            .unwrap()
            .with_vad(Box::new(vad));
        let mut handle = pipeline.start(Arc::new(UnavailableLoader)).unwrap();

        // silence, speech, speech, silence; the last frame arrives in two pieces
        handle.push_samples(&[0.0; 4]).unwrap();
        handle.push_samples(&[0.5; 8]).unwrap();
        handle.push_samples(&[0.0; 2]).unwrap();
        assert_eq!(handle.frames_sent(), 3);
        handle.push_samples(&[0.0; 2]).unwrap();
        assert_eq!(handle.frames_sent(), 4);

        assert_eq!(
            wait_for(&mut handle, 2),
            vec![EventType::Activate, EventType::Deactivate]
        );
        assert!(handle.stop().unwrap().is_empty());
    }

    #[test]
    fn test_calibration_frames_are_not_forwarded() {
        let (vad, observed) = TestVad::new(2);
        let pipeline = SpeechPipeline::new(config(vec![Stage::VadTrigger]), 16000)
            .unwrap()
            .with_vad(Box::new(vad));
        let mut handle = pipeline.start(Arc::new(UnavailableLoader)).unwrap();
        assert!(handle.is_calibrating());

        // speech during calibration never reaches the stages
        handle.push_samples(&[0.5; 8]).unwrap();
        assert!(!handle.is_calibrating());
        assert_eq!(observed.load(Ordering::SeqCst), 2);
        assert_eq!(handle.frames_sent(), 0);

        handle.push_samples(&[0.5; 4]).unwrap();
        assert_eq!(wait_for(&mut handle, 1), vec![EventType::Activate]);
        handle.stop().unwrap();
    }

    #[test]
    fn test_flush_pads_partial_frame() {
        let (vad, _) = TestVad::new(0);
        let pipeline = SpeechPipeline::new(config(vec![Stage::VadTrigger]), 16000)
            .unwrap()
            .with_vad(Box::new(vad));
        let mut handle = pipeline.start(Arc::new(UnavailableLoader)).unwrap();
        handle.push_samples(&[0.5]).unwrap();
        assert_eq!(handle.frames_sent(), 0);
        handle.flush().unwrap();
        assert_eq!(handle.frames_sent(), 1);
        assert_eq!(wait_for(&mut handle, 1), vec![EventType::Activate]);
        handle.stop().unwrap();
    }

    /// Keyword models whose detector always fails.
    struct CrashingDetectLoader;

    impl ModelLoader for CrashingDetectLoader {
        fn load(&self, _urls: &ModelUrls) -> anyhow::Result<CommandModels> {
            Ok(CommandModels {
                filter: Box::new(MeanFilter {
                    fft_width: 512,
                    width: 4,
                }),
                encode: Box::new(SumEncoder {
                    mel_frames: Some(3),
                    mel_width: 4,
                    width: 4,
                    state_width: 4,
                }),
                detect: Box::new(FailingModel),
            })
        }
    }

    #[test]
    fn test_stage_error_refuses_further_audio() {
        let (vad, _) = TestVad::new(0);
        let mut config = config(vec![Stage::KeywordRecognizer]);
        config.speech.base_keyword_url = Some("https://example.com/kw".to_string());
        config.speech.keyword_classes = vec!["yes".to_string()];
        let pipeline = SpeechPipeline::new(config, 16000)
            .unwrap()
            .with_vad(Box::new(vad));
        let mut handle = pipeline.start(Arc::new(CrashingDetectLoader)).unwrap();

        // the end of the active period runs the failing detector
        handle.push_samples(&[0.5; 4]).unwrap();
        handle.push_samples(&[0.0; 4]).unwrap();
        let event = handle.recv_event(Duration::from_secs(5)).unwrap();
        assert_eq!(event.event_type, EventType::Error);
        assert!(event.error.unwrap().contains("model crashed"));
        assert!(handle.is_halted());

        let err = handle.push_samples(&[0.5; 4]).err().unwrap();
        assert!(matches!(err, SpeechError::WorkerTerminated));
        assert_eq!(handle.frames_sent(), 2);
        assert!(handle.stop().unwrap().is_empty());
    }

    #[test]
    fn test_start_reports_stage_failure() {
        let pipeline = SpeechPipeline::new(Config::default(), 16000).unwrap();
        let err = pipeline.start(Arc::new(UnavailableLoader)).err().unwrap();
        assert!(matches!(err, SpeechError::Initialization(_)));
        assert!(err.to_string().contains("keyword URL required"));
    }
}
