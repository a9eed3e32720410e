//! Inference capability consumed by the model-backed stages.
//!
//! Model execution itself lives outside this crate. A stage only needs each
//! model's declared input shapes (to size its windows) and a synchronous
//! `execute`. Outputs are owned arrays: a stage copies what it needs into a
//! ring-buffer slot or a scalar and drops the rest before the next call.

use ndarray::{ArrayD, ArrayViewD};

use crate::error::{Result, SpeechError};

/// Declared tensor shape; `None` marks a dynamic dimension.
pub type Shape = Vec<Option<usize>>;

pub trait Model: Send {
    /// Declared shapes of the model inputs, in input order.
    fn input_shapes(&self) -> Vec<Shape>;

    /// Runs the model on `inputs` and returns its outputs in order.
    fn execute(&self, inputs: &[ArrayViewD<'_, f32>]) -> anyhow::Result<Vec<ArrayD<f32>>>;
}

/// The filter -> encode -> detect cascade used by wakeword and keyword stages.
pub struct CommandModels {
    pub filter: Box<dyn Model>,
    pub encode: Box<dyn Model>,
    pub detect: Box<dyn Model>,
}

/// Locations of the three models under a base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUrls {
    pub filter: String,
    pub encode: String,
    pub detect: String,
}

pub fn model_urls(base_url: &str, fft_width: usize) -> ModelUrls {
    let base = base_url.trim_end_matches('/');
    ModelUrls {
        filter: format!("{}/filter_{}/model.json", base, fft_width),
        encode: format!("{}/encode/model.json", base),
        detect: format!("{}/detect/model.json", base),
    }
}

/// Resolves model locations to runnable models.
pub trait ModelLoader: Send + Sync {
    fn load(&self, urls: &ModelUrls) -> anyhow::Result<CommandModels>;
}

/// Loader used when no inference backend is compiled in.
pub struct UnavailableLoader;

impl ModelLoader for UnavailableLoader {
    fn load(&self, urls: &ModelUrls) -> anyhow::Result<CommandModels> {
        anyhow::bail!("no inference backend available to load {}", urls.filter)
    }
}

pub(crate) fn load_models(
    loader: &dyn ModelLoader,
    base_url: &str,
    fft_width: usize,
) -> Result<CommandModels> {
    let urls = model_urls(base_url, fft_width);
    tracing::debug!(filter = %urls.filter, encode = %urls.encode, detect = %urls.detect, "loading models");
    loader.load(&urls).map_err(SpeechError::ModelLoad)
}

/// Dimension `axis` of input `input`; negative axes count from the end.
pub(crate) fn declared_dim(model: &dyn Model, input: usize, axis: isize) -> Option<usize> {
    let shapes = model.input_shapes();
    let shape = shapes.get(input)?;
    let index = if axis < 0 {
        shape.len().checked_sub(axis.unsigned_abs())?
    } else {
        axis as usize
    };
    shape.get(index).copied().flatten()
}

/// Runs `model` and returns output `index`, releasing the others.
pub(crate) fn execute_output(
    model: &dyn Model,
    inputs: &[ArrayViewD<'_, f32>],
    index: usize,
) -> Result<ArrayD<f32>> {
    let outputs = model.execute(inputs).map_err(SpeechError::Inference)?;
    outputs.into_iter().nth(index).ok_or_else(|| {
        SpeechError::Inference(anyhow::anyhow!("model produced no output #{}", index))
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic stand-in models for stage tests.

    use super::*;
    use ndarray::{Array1, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Mean of every input sample, repeated `width` times.
    pub struct MeanFilter {
        pub fft_width: usize,
        pub width: usize,
    }

    impl Model for MeanFilter {
        fn input_shapes(&self) -> Vec<Shape> {
            vec![vec![Some(self.fft_width)]]
        }

        fn execute(&self, inputs: &[ArrayViewD<'_, f32>]) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let mean = inputs[0].mean().unwrap_or(0.0);
            Ok(vec![ArrayD::from_elem(IxDyn(&[1, self.width]), mean)])
        }
    }

    /// Encodes the last mel frame plus the running state; the new state is a
    /// running sum so state leaking across resets shows up in outputs.
    pub struct SumEncoder {
        pub mel_frames: Option<usize>,
        pub mel_width: usize,
        pub width: usize,
        pub state_width: usize,
    }

    impl Model for SumEncoder {
        fn input_shapes(&self) -> Vec<Shape> {
            vec![
                vec![Some(1), self.mel_frames, Some(self.mel_width)],
                vec![Some(1), Some(self.state_width)],
            ]
        }

        fn execute(&self, inputs: &[ArrayViewD<'_, f32>]) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let frames = &inputs[0];
            let state = &inputs[1];
            let frame_sum = frames.sum();
            let carried = state.sum() / self.state_width as f32;
            let encoded = frame_sum + carried;
            Ok(vec![
                ArrayD::from_elem(IxDyn(&[1, 1, self.width]), encoded),
                ArrayD::from_elem(IxDyn(&[1, self.state_width]), carried + frame_sum),
            ])
        }
    }

    /// Returns scripted posteriors, one vector per call, repeating the last.
    pub struct ScriptedDetect {
        pub encode_frames: usize,
        pub encode_width: usize,
        pub outputs: Vec<Vec<f32>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl Model for ScriptedDetect {
        fn input_shapes(&self) -> Vec<Shape> {
            vec![vec![Some(1), Some(self.encode_frames), Some(self.encode_width)]]
        }

        fn execute(&self, _inputs: &[ArrayViewD<'_, f32>]) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let row = self
                .outputs
                .get(call)
                .or_else(|| self.outputs.last())
                .cloned()
                .unwrap_or_default();
            let len = row.len();
            Ok(vec![Array1::from(row).into_shape(IxDyn(&[1, len]))?])
        }
    }

    /// Squashes the mean of the encode window into (0, 1).
    pub struct MeanDetect {
        pub encode_frames: usize,
        pub encode_width: usize,
    }

    impl Model for MeanDetect {
        fn input_shapes(&self) -> Vec<Shape> {
            vec![vec![Some(1), Some(self.encode_frames), Some(self.encode_width)]]
        }

        fn execute(&self, inputs: &[ArrayViewD<'_, f32>]) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let mean = inputs[0].mean().unwrap_or(0.0);
            let posterior = 1.0 / (1.0 + (-mean).exp());
            Ok(vec![ArrayD::from_elem(IxDyn(&[1, 1]), posterior)])
        }
    }

    /// Always fails, to exercise inference error paths.
    pub struct FailingModel;

    impl Model for FailingModel {
        fn input_shapes(&self) -> Vec<Shape> {
            vec![vec![Some(1), Some(4), Some(4)], vec![Some(1), Some(4)]]
        }

        fn execute(&self, _inputs: &[ArrayViewD<'_, f32>]) -> anyhow::Result<Vec<ArrayD<f32>>> {
            anyhow::bail!("model crashed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_urls() {
        let urls = model_urls("https://example.com/kw/", 512);
        assert_eq!(urls.filter, "https://example.com/kw/filter_512/model.json");
        assert_eq!(urls.encode, "https://example.com/kw/encode/model.json");
        assert_eq!(urls.detect, "https://example.com/kw/detect/model.json");
    }

    #[test]
    fn test_declared_dim() {
        let detect = testing::MeanDetect {
            encode_frames: 7,
            encode_width: 3,
        };
        assert_eq!(declared_dim(&detect, 0, 1), Some(7));
        assert_eq!(declared_dim(&detect, 0, -1), Some(3));
        assert_eq!(declared_dim(&detect, 1, 0), None);
        assert_eq!(declared_dim(&detect, 0, -4), None);

        let encode = testing::SumEncoder {
            mel_frames: None,
            mel_width: 4,
            width: 2,
            state_width: 2,
        };
        assert_eq!(declared_dim(&encode, 0, 1), None);
        assert_eq!(declared_dim(&encode, 1, 1), Some(2));
    }

    #[test]
    fn test_unavailable_loader_reports_url() {
        let err = load_models(&UnavailableLoader, "https://example.com/ww", 256)
            .err()
            .unwrap();
        assert!(err.to_string().contains("filter_256"));
    }
}
