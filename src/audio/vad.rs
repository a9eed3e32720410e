// VAD (Voice Activity Detection)
//
// Frequency-band energy detector: each frame's average byte energy over
// [min_capture_freq, max_capture_freq] is compared against a noise floor
// measured during calibration. A run-length counter gives the decision rise
// and fall hysteresis, and a ceiling on uninterrupted activity forces the
// detector back to inactive.

use crate::audio::analyser::{frequency_average, FrequencyAnalyser};
use crate::config::VadConfig;
use crate::error::{Result, SpeechError};

/// Voice activity for the most recently scored frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadStatus {
    pub active: bool,
    /// Whether `active` flipped since the previous status read.
    pub changed: bool,
}

/// Trait for voice activity detection, so hosts can swap detectors.
pub trait VadProcessor: Send {
    /// Scores one frame of samples and returns the smoothed activity state.
    fn process(&mut self, samples: &[f32]) -> Result<VadStatus>;

    /// Number of leading frames to spend on noise calibration.
    fn calibration_frames(&self) -> usize {
        0
    }

    /// Feeds one calibration frame.
    fn observe_noise(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    /// Derives detection levels from the observed noise.
    fn finish_calibration(&mut self) {}
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    analyser: FrequencyAnalyser,
    frame_size: Option<usize>,

    base_level: f32,
    voice_scale: f32,
    last_average: f32,
    noise_levels: Vec<f32>,

    activity_counter: u32,
    rise_frames: u32,
    fall_frames: u32,
    max_active_frames: u32,

    prev_active: bool,
    is_speech: bool,
    active: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig, fft_width: usize, sample_rate: u32) -> Self {
        Self {
            config: config.clone(),
            analyser: FrequencyAnalyser::new(
                fft_width,
                sample_rate,
                config.smoothing_time_constant,
            ),
            frame_size: None,
            base_level: 0.3,
            voice_scale: 1.0,
            last_average: 0.0,
            noise_levels: Vec::new(),
            activity_counter: 0,
            rise_frames: 0,
            fall_frames: 0,
            max_active_frames: config.max_active,
            prev_active: false,
            is_speech: false,
            active: false,
        }
    }

    /// Attaches the detector to a source delivering `frame_size` samples per
    /// frame. Millisecond delays are converted to frame counts here.
    pub fn connect(&mut self, frame_size: usize) {
        let ms_per_frame = frame_size as f32 / (self.analyser.sample_rate() as f32 / 1000.0);
        self.rise_frames = (self.config.rise_delay as f32 / ms_per_frame).floor() as u32;
        self.fall_frames = (self.config.fall_delay as f32 / ms_per_frame).floor() as u32;
        self.max_active_frames = (self.config.max_active as f32 / ms_per_frame).floor() as u32;
        self.frame_size = Some(frame_size);
        tracing::debug!(
            frame_size,
            rise_frames = self.rise_frames,
            fall_frames = self.fall_frames,
            max_active_frames = self.max_active_frames,
            "VAD connected"
        );
    }

    pub fn disconnect(&mut self) {
        self.frame_size = None;
    }

    pub fn is_connected(&self) -> bool {
        self.frame_size.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn base_level(&self) -> f32 {
        self.base_level
    }

    /// Normalized speech level of the last frame, 0 at the noise floor.
    pub fn level(&self) -> f32 {
        (self.last_average - self.base_level).max(0.0) / self.voice_scale
    }

    /// Scores one frame and advances the hysteresis state.
    /// Returns the frame's average band energy.
    pub fn analyse(&mut self, samples: &[f32]) -> Result<f32> {
        let average = self.band_average(samples)?;
        self.advance(average);
        Ok(average)
    }

    /// Reads the activity state, tracking whether it changed since the last read.
    pub fn vad_status(&mut self) -> VadStatus {
        let changed = self.prev_active != self.active;
        self.prev_active = self.active;
        VadStatus {
            active: self.active,
            changed,
        }
    }

    /// Sets the noise floor from the calibration observations.
    pub fn set_levels(&mut self) {
        let observed = self
            .noise_levels
            .iter()
            .copied()
            .filter(|&level| level > 0.0)
            .fold(None, |min: Option<f32>, level| {
                Some(min.map_or(level, |m| m.min(level)))
            });
        let floor = match observed {
            Some(level) => level.min(1.0),
            None if self.config.min_noise_level > 0.0 => self.config.min_noise_level,
            None => 0.1,
        };

        let mut base_level = floor * self.config.avg_noise_multiplier;
        if self.config.min_noise_level > 0.0 && base_level < self.config.min_noise_level {
            base_level = self.config.min_noise_level;
        }
        if self.config.max_noise_level > 0.0 && base_level > self.config.max_noise_level {
            base_level = self.config.max_noise_level;
        }

        self.base_level = base_level;
        self.voice_scale = 1.0 - base_level;
        tracing::info!(
            base_level,
            frames = self.noise_levels.len(),
            "VAD calibrated"
        );
    }

    fn band_average(&mut self, samples: &[f32]) -> Result<f32> {
        if !self.is_connected() {
            return Err(SpeechError::VadNotConnected);
        }
        self.analyser.push(samples);
        let bins = self.analyser.byte_frequency_data();
        let average = frequency_average(
            &bins,
            self.analyser.sample_rate(),
            self.config.min_capture_freq,
            self.config.max_capture_freq,
        );
        self.last_average = average;
        Ok(average)
    }

    fn advance(&mut self, average: f32) {
        let is_speech = average >= self.base_level;
        if is_speech == self.is_speech {
            self.activity_counter += 1;
        } else {
            self.is_speech = is_speech;
            self.activity_counter = 1;
        }

        if self.is_speech != self.active {
            if self.is_speech && self.activity_counter >= self.rise_frames {
                self.active = true;
            }
            if !self.is_speech && self.activity_counter >= self.fall_frames {
                self.active = false;
            }
        } else if self.active && self.activity_counter >= self.max_active_frames {
            tracing::debug!(frames = self.activity_counter, "VAD max activity timeout");
            self.is_speech = false;
            self.active = false;
        }
    }
}

impl VadProcessor for VoiceActivityDetector {
    fn process(&mut self, samples: &[f32]) -> Result<VadStatus> {
        self.analyse(samples)?;
        Ok(self.vad_status())
    }

    fn calibration_frames(&self) -> usize {
        if !self.config.calibrate {
            return 0;
        }
        let frame_size = self.frame_size.unwrap_or(1).max(1) as f32;
        let samples = self.config.noise_capture_duration * self.analyser.sample_rate() as f32;
        (samples / frame_size).ceil() as usize
    }

    fn observe_noise(&mut self, samples: &[f32]) -> Result<()> {
        let average = self.band_average(samples)?;
        self.noise_levels.push(average);
        Ok(())
    }

    fn finish_calibration(&mut self) {
        self.set_levels();
    }
}
