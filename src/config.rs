use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SpeechError;
use crate::pipeline::PipelineProfile;
use crate::speech::processor::Stage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub vad: VadConfig,
    pub pipeline: PipelineSection,
}

/// Options shared by every stage of the pipeline. Field names also accept
/// their camelCase spelling, as used by the worker protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Audio sample rate in Hz.
    #[serde(alias = "sampleRate")]
    pub sample_rate: u32,
    /// STFT window size in samples. Must be a power of two.
    #[serde(alias = "fftWidth")]
    pub fft_width: usize,
    /// Hop between STFT windows, in milliseconds.
    #[serde(alias = "hopLength")]
    pub hop_length: u32,
    /// Samples per frame delivered to the pipeline.
    #[serde(alias = "frameSize")]
    pub frame_size: usize,
    /// Mel spectrogram window, in milliseconds. Stages pick their own default.
    #[serde(alias = "melLength")]
    pub mel_length: Option<u32>,
    /// Filterbank components per mel frame.
    #[serde(alias = "melWidth")]
    pub mel_width: usize,
    /// Encoder output size.
    #[serde(alias = "encodeWidth")]
    pub encode_width: usize,
    /// Encoder sliding window, in milliseconds.
    #[serde(alias = "encodeLength")]
    pub encode_length: u32,
    /// Encoder state size. Defaults to `encode_width`.
    #[serde(alias = "stateWidth")]
    pub state_width: Option<usize>,
    #[serde(alias = "wakeThreshold")]
    pub wake_threshold: f32,
    #[serde(alias = "keywordThreshold")]
    pub keyword_threshold: f32,
    /// Ordered class labels for the keyword model.
    #[serde(alias = "keywordClasses")]
    pub keyword_classes: Vec<String>,
    #[serde(alias = "baseKeywordUrl")]
    pub base_keyword_url: Option<String>,
    #[serde(alias = "baseWakewordUrl")]
    pub base_wakeword_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Smoothing between successive spectra, 0..1.
    pub smoothing_time_constant: f32,
    /// Lowest frequency included in the energy average, in Hz.
    pub min_capture_freq: f32,
    /// Highest frequency included in the energy average, in Hz.
    pub max_capture_freq: f32,
    /// Seconds of ambient audio observed during calibration.
    pub noise_capture_duration: f32,
    pub min_noise_level: f32,
    pub max_noise_level: f32,
    pub avg_noise_multiplier: f32,
    /// Speech (ms) ignored before the VAD turns active.
    pub rise_delay: u32,
    /// Silence (ms) ignored before the VAD turns inactive.
    pub fall_delay: u32,
    /// Longest uninterrupted activation (ms) before a forced deactivation.
    pub max_active: u32,
    /// Run noise calibration before scoring frames.
    pub calibrate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub profile: PipelineProfile,
    /// Explicit stage list. Overrides `profile` when present.
    pub stages: Option<Vec<Stage>>,
}

// --- Default implementations ---

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            fft_width: 512,
            hop_length: 10,
            frame_size: 512,
            mel_length: None,
            mel_width: 40,
            encode_width: 128,
            encode_length: 1000,
            state_width: None,
            wake_threshold: 0.5,
            keyword_threshold: 0.5,
            keyword_classes: Vec::new(),
            base_keyword_url: None,
            base_wakeword_url: None,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            smoothing_time_constant: 0.2,
            min_capture_freq: 85.0,
            max_capture_freq: 255.0,
            noise_capture_duration: 1.0,
            min_noise_level: 0.3,
            max_noise_level: 0.7,
            avg_noise_multiplier: 1.2,
            rise_delay: 0,
            fall_delay: 250,
            max_active: 2000,
            calibrate: true,
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            profile: PipelineProfile::Keyword,
            stages: None,
        }
    }
}

impl SpeechConfig {
    /// Samples to slide the STFT window between filter runs.
    pub fn hop_samples(&self) -> usize {
        (self.hop_length as usize * self.sample_rate as usize) / 1000
    }

    /// Converts a duration in milliseconds to a number of STFT hops.
    pub fn hops_in(&self, millis: u32) -> usize {
        let hop = self.hop_samples();
        if hop == 0 {
            return 0;
        }
        (millis as usize * self.sample_rate as usize) / 1000 / hop
    }
}

impl PipelineSection {
    /// Stage list to run: the explicit list, otherwise the profile preset.
    pub fn resolved_stages(&self) -> Vec<Stage> {
        match &self.stages {
            Some(stages) => stages.clone(),
            None => self.profile.stages().to_vec(),
        }
    }
}

// --- Config loading ---

impl Config {
    /// Load config and return the resolved file path (if any).
    pub fn load_with_path(path: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        // 1. Check explicit path
        if let Some(p) = path {
            let content = std::fs::read_to_string(p).map_err(|e| {
                anyhow::anyhow!("Failed to read config file {}: {}", p.display(), e)
            })?;
            let config: Config = toml::from_str(&content)?;
            return Ok((config, Some(p.to_path_buf())));
        }

        // 2. Check beside the executable
        if let Ok(exe_path) = std::env::current_exe() {
            let beside_exe = exe_path.parent().map(|p| p.join("speechpipe.toml"));
            if let Some(p) = beside_exe {
                if p.exists() {
                    let content = std::fs::read_to_string(&p)?;
                    let config: Config = toml::from_str(&content)?;
                    return Ok((config, Some(p)));
                }
            }
        }

        // 3. Check platform config directory
        if let Some(config_dir) = dirs::config_dir() {
            let platform_config = config_dir.join("speechpipe").join("config.toml");
            if platform_config.exists() {
                let content = std::fs::read_to_string(&platform_config)?;
                let config: Config = toml::from_str(&content)?;
                return Ok((config, Some(platform_config)));
            }
        }

        // 4. Fall back to defaults
        tracing::info!("No config file found, using defaults");
        Ok((Config::default(), None))
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_path(path).map(|(config, _)| config)
    }

    /// Checks value ranges the stages and VAD rely on.
    pub fn validate(&self) -> Result<(), SpeechError> {
        let speech = &self.speech;
        let invalid = |msg: String| Err(SpeechError::InvalidConfig(msg));

        if speech.sample_rate == 0 {
            return Err(SpeechError::InvalidSampleRate);
        }
        if !speech.fft_width.is_power_of_two() {
            return invalid(format!("fft_width {} is not a power of two", speech.fft_width));
        }
        if speech.frame_size == 0 {
            return invalid("frame_size must be positive".to_string());
        }
        if (speech.hop_length as usize * speech.sample_rate as usize) % 1000 != 0 {
            return invalid(format!(
                "hop_length {} ms is not a whole number of samples at {} Hz",
                speech.hop_length, speech.sample_rate
            ));
        }
        let hop = speech.hop_samples();
        if hop == 0 || hop > speech.fft_width {
            return invalid(format!(
                "hop of {} samples must be within 1..={}",
                hop, speech.fft_width
            ));
        }
        for (name, value) in [
            ("wake_threshold", speech.wake_threshold),
            ("keyword_threshold", speech.keyword_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} {} is outside [0, 1]", name, value));
            }
        }

        let vad = &self.vad;
        if vad.min_capture_freq >= vad.max_capture_freq {
            return invalid(format!(
                "vad capture range {}..{} Hz is empty",
                vad.min_capture_freq, vad.max_capture_freq
            ));
        }
        if vad.min_noise_level > vad.max_noise_level {
            return invalid(format!(
                "vad min_noise_level {} exceeds max_noise_level {}",
                vad.min_noise_level, vad.max_noise_level
            ));
        }
        if !(0.0..=1.0).contains(&vad.smoothing_time_constant) {
            return invalid(format!(
                "vad smoothing_time_constant {} is outside [0, 1]",
                vad.smoothing_time_constant
            ));
        }
        Ok(())
    }

    /// Generate a default config file with all fields and inline documentation.
    pub fn generate_default_commented() -> String {
        r#"# speechpipe configuration

[speech]
# Audio sample rate in Hz. Input files must match this rate.
sample_rate = 16000
# STFT window size in samples (power of two).
fft_width = 512
# Time to slide the STFT window between filter runs, in milliseconds.
hop_length = 10
# Samples per frame handed to the VAD and stages.
frame_size = 512
# Mel spectrogram window in milliseconds, used only when the encode model
# leaves its time dimension dynamic. Defaults: keyword 110, wakeword 10.
# mel_length = 110
# Filterbank components per mel frame (fallback when the model is dynamic).
mel_width = 40
# Encoder output size.
encode_width = 128
# Encoder sliding window in milliseconds.
encode_length = 1000
# Encoder state size; defaults to encode_width.
# state_width = 128
# Posterior above which the wakeword fires (0.0 to 1.0).
wake_threshold = 0.5
# Posterior above which a keyword is recognized (0.0 to 1.0).
keyword_threshold = 0.5
# Ordered keyword labels, one per class of the detect model.
keyword_classes = []
# Model roots containing filter_<fft_width>/, encode/ and detect/ folders.
# base_keyword_url = "https://example.com/models/keyword"
# base_wakeword_url = "https://example.com/models/wakeword"

[vad]
# Smoothing between successive spectra (0.0 to 1.0).
smoothing_time_constant = 0.2
# Frequency band averaged for speech energy, in Hz.
min_capture_freq = 85.0
max_capture_freq = 255.0
# Seconds of ambient audio observed to set the noise floor.
noise_capture_duration = 1.0
# Bounds for the calibrated noise floor (0.0 to 1.0).
min_noise_level = 0.3
max_noise_level = 0.7
# Multiplier applied to the quietest calibration frame.
avg_noise_multiplier = 1.2
# Milliseconds of speech before the VAD activates.
rise_delay = 0
# Milliseconds of silence before the VAD deactivates.
fall_delay = 250
# Longest activation in milliseconds before a forced deactivation.
max_active = 2000
# Calibrate against ambient noise before scoring frames.
calibrate = true

[pipeline]
# Preset stage list: "keyword" (vadTrigger + keyword) or "wakeword".
profile = "keyword"
# Explicit stages override the profile.
# stages = ["vadTrigger", "keyword"]
"#
        .to_string()
    }
}
