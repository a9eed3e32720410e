// Sample format helpers shared by the CLI and hosts feeding the pipeline.

use std::path::Path;

use anyhow::{Context, Result};

/// Converts float samples in [-1, 1] to 16-bit PCM, saturating out-of-range values.
pub fn float_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts 16-bit PCM to float samples in [-1, 1].
pub fn i16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Joins two optional mono buffers recorded at the same rate.
///
/// Returns whichever buffer is present when only one is, and `None` when
/// neither is or the sample rates differ.
pub fn concat_buffers(
    first: Option<(&[f32], u32)>,
    second: Option<(&[f32], u32)>,
) -> Option<(Vec<f32>, u32)> {
    match (first, second) {
        (None, None) => {
            tracing::warn!("concat_buffers called without any buffer");
            None
        }
        (Some((samples, rate)), None) | (None, Some((samples, rate))) => {
            Some((samples.to_vec(), rate))
        }
        (Some((a, rate_a)), Some((b, rate_b))) => {
            if rate_a != rate_b {
                tracing::warn!(rate_a, rate_b, "sample rates don't match");
                return None;
            }
            let mut joined = Vec::with_capacity(a.len() + b.len());
            joined.extend_from_slice(a);
            joined.extend_from_slice(b);
            Some((joined, rate_a))
        }
    }
}

/// Reads a mono WAV file as float samples, returning them with the file's rate.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        anyhow::bail!(
            "{} has {} channels, expected mono",
            path.display(),
            spec.channels
        );
    }

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, _) => {
            reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?
        }
        (hound::SampleFormat::Int, 16) => {
            let pcm = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
            i16_to_float(&pcm)
        }
        (hound::SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    tracing::debug!(
        path = %path.display(),
        samples = samples.len(),
        sample_rate = spec.sample_rate,
        "read WAV"
    );
    Ok((samples, spec.sample_rate))
}
