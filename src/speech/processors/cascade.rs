// Streaming feature cascade shared by the wakeword and keyword stages.
//
// Raw samples accumulate in an fft-width window. Each time it fills, the
// "filter" model turns it into one mel frame and the window slides by one
// hop. The mel frame enters a sliding mel window, which the "encode" model
// consumes together with its carried state to emit one encoded vector into
// the encode window. The "detect" model classifies the whole encode window.
//
// Window sizes come from the models' declared input shapes. A dimension the
// model leaves dynamic falls back to configuration; a model that declares no
// input at all cannot be sized and is rejected.

use ndarray::{Array1, ArrayD, ArrayView1, Axis};

use crate::audio::ring_buffer::RingBuffer;
use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::speech::models::{declared_dim, execute_output, CommandModels};

const ENCODE_FILL: f32 = -1.0;

/// Resolved window geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeDims {
    pub hop_samples: usize,
    pub mel_frames: usize,
    pub mel_width: usize,
    pub encode_frames: usize,
    pub encode_width: usize,
    pub state_width: usize,
}

impl CascadeDims {
    fn resolve(models: &CommandModels, config: &SpeechConfig, mel_length: u32) -> Result<Self> {
        if config.sample_rate == 0 {
            return Err(SpeechError::InvalidSampleRate);
        }
        let hop_samples = config.hop_samples();
        if hop_samples == 0 || hop_samples > config.fft_width {
            return Err(SpeechError::InvalidConfig(format!(
                "hop of {} samples does not fit an fft window of {}",
                hop_samples, config.fft_width
            )));
        }

        if models.detect.input_shapes().is_empty() {
            return Err(SpeechError::ModelShape(
                "unable to load the detect model".to_string(),
            ));
        }
        if models.encode.input_shapes().len() < 2 {
            return Err(SpeechError::ModelShape(
                "unable to load the encode model".to_string(),
            ));
        }

        let encode = models.encode.as_ref();
        let detect = models.detect.as_ref();
        let mel_frames =
            declared_dim(encode, 0, 1).unwrap_or_else(|| config.hops_in(mel_length));
        let mel_width = declared_dim(encode, 0, -1).unwrap_or(config.mel_width);
        let encode_frames = declared_dim(detect, 0, 1)
            .unwrap_or_else(|| config.hops_in(config.encode_length));
        let encode_width = declared_dim(detect, 0, -1).unwrap_or(config.encode_width);
        let state_width = declared_dim(encode, 1, 1)
            .or(config.state_width)
            .unwrap_or(encode_width);

        let dims = Self {
            hop_samples,
            mel_frames,
            mel_width,
            encode_frames,
            encode_width,
            state_width,
        };
        if [mel_frames, mel_width, encode_frames, encode_width, state_width].contains(&0) {
            return Err(SpeechError::ModelShape(format!(
                "window dimensions must be non-zero: {:?}",
                dims
            )));
        }
        Ok(dims)
    }
}

pub struct FeatureCascade {
    models: CommandModels,
    dims: CascadeDims,
    sample_window: RingBuffer<f32>,
    frame_window: RingBuffer<Array1<f32>>,
    encode_window: RingBuffer<Array1<f32>>,
    encode_state: Array1<f32>,
}

impl FeatureCascade {
    /// `mel_length` is the stage's default mel window in milliseconds, used
    /// when neither the model nor the config fixes it.
    pub fn new(models: CommandModels, config: &SpeechConfig, mel_length: u32) -> Result<Self> {
        let mel_length = config.mel_length.unwrap_or(mel_length);
        let dims = CascadeDims::resolve(&models, config, mel_length)?;
        tracing::debug!(?dims, "feature cascade sized");

        let mut frame_window = RingBuffer::new(dims.mel_frames);
        frame_window.fill(Array1::zeros(dims.mel_width));
        let mut encode_window = RingBuffer::new(dims.encode_frames);
        encode_window.fill(Array1::from_elem(dims.encode_width, ENCODE_FILL));

        Ok(Self {
            models,
            dims,
            sample_window: RingBuffer::new(config.fft_width),
            frame_window,
            encode_window,
            encode_state: Array1::zeros(dims.state_width),
        })
    }

    pub fn dims(&self) -> CascadeDims {
        self.dims
    }

    /// Adds one sample. When the sample window is full and `analyse` is set,
    /// runs filter and encode; either way the window then slides one hop.
    /// Returns whether a new encoded vector was produced.
    pub fn push_sample(&mut self, sample: f32, analyse: bool) -> Result<bool> {
        self.sample_window.write(sample);
        if !self.sample_window.is_full() {
            return Ok(false);
        }
        if analyse {
            self.filter()?;
        }
        self.sample_window.rewind().seek(self.dims.hop_samples);
        Ok(analyse)
    }

    /// Runs the detect model over the encode window and returns its posteriors.
    pub fn detect(&mut self) -> Result<Vec<f32>> {
        let encoded = self.encode_window.to_vec();
        let input = stack_frames(&encoded)?.insert_axis(Axis(0)).into_dyn();
        let detected = execute_output(self.models.detect.as_ref(), &[input.view()], 0)?;
        Ok(detected.iter().copied().collect())
    }

    /// Returns every window and the encoder state to their initial contents.
    pub fn reset(&mut self) {
        self.sample_window.reset();
        self.frame_window
            .reset()
            .fill(Array1::zeros(self.dims.mel_width));
        self.encode_window
            .reset()
            .fill(Array1::from_elem(self.dims.encode_width, ENCODE_FILL));
        self.encode_state = Array1::zeros(self.dims.state_width);
    }

    fn filter(&mut self) -> Result<()> {
        let samples = Array1::from(self.sample_window.to_vec());
        let mel = execute_output(
            self.models.filter.as_ref(),
            &[samples.view().into_dyn()],
            0,
        )?;
        let mel = flatten(mel, self.dims.mel_width, "filter")?;

        self.frame_window.rewind().seek(1);
        self.frame_window.write(mel);
        self.encode()
    }

    fn encode(&mut self) -> Result<()> {
        let frames = self.frame_window.to_vec();
        let input = stack_frames(&frames)?.insert_axis(Axis(0)).into_dyn();
        let state = self.encode_state.view().insert_axis(Axis(0)).into_dyn();

        let mut outputs = self
            .models
            .encode
            .execute(&[input.view(), state])
            .map_err(SpeechError::Inference)?
            .into_iter();
        let (encoded, next_state) = match (outputs.next(), outputs.next()) {
            (Some(encoded), Some(state)) => (encoded, state),
            _ => {
                return Err(SpeechError::Inference(anyhow::anyhow!(
                    "encode model must return an encoding and a state"
                )))
            }
        };

        self.encode_window.rewind().seek(1);
        self.encode_window
            .write(flatten(encoded, self.dims.encode_width, "encode")?);
        self.encode_state = flatten(next_state, self.dims.state_width, "encode state")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> CascadeSnapshot {
        CascadeSnapshot {
            pending_samples: self.sample_window.len(),
            frames: self.frame_window.snapshot(),
            encoded: self.encode_window.snapshot(),
            state: self.encode_state.clone(),
        }
    }
}

/// Observable window contents, for comparing a reset cascade to a fresh one.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CascadeSnapshot {
    pub pending_samples: usize,
    pub frames: Vec<Array1<f32>>,
    pub encoded: Vec<Array1<f32>>,
    pub state: Array1<f32>,
}

fn stack_frames(frames: &[Array1<f32>]) -> Result<ndarray::Array2<f32>> {
    let views: Vec<ArrayView1<'_, f32>> = frames.iter().map(|f| f.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| SpeechError::ModelShape(e.to_string()))
}

fn flatten(output: ArrayD<f32>, expected: usize, model: &str) -> Result<Array1<f32>> {
    if output.len() != expected {
        return Err(SpeechError::ModelShape(format!(
            "{} output has {} values, expected {}",
            model,
            output.len(),
            expected
        )));
    }
    Ok(output.iter().copied().collect())
}
