//! Spectrum analysis for the VAD.
//!
//! Mirrors the behaviour of a Web Audio `AnalyserNode`: the most recent
//! `fft_size` samples are Blackman-windowed, transformed, smoothed over time
//! and mapped from decibels onto the byte range `0..=255`.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::audio::ring_buffer::RingBuffer;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate: u32,
    smoothing: f32,
    window: Vec<f32>,
    history: RingBuffer<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl FrequencyAnalyser {
    pub fn new(fft_size: usize, sample_rate: u32, smoothing: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let mut history = RingBuffer::new(fft_size);
        history.fill(0.0);

        Self {
            fft,
            fft_size,
            sample_rate,
            smoothing,
            window: blackman_window(fft_size),
            history,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    /// Number of frequency bins produced per analysis.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Appends samples to the time-domain history, dropping the oldest.
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            if self.history.is_full() {
                self.history.rewind().seek(1);
            }
            self.history.write(sample);
        }
    }

    /// Analyses the current history and returns one byte per frequency bin.
    ///
    /// Each call advances the time smoothing, so call once per frame.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let samples = self.history.snapshot();
        for (slot, (&sample, &w)) in self
            .scratch
            .iter_mut()
            .zip(samples.iter().zip(self.window.iter()))
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        self.smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                let db = 20.0 * smoothed.log10();
                let scaled = (255.0 / range) * (db - MIN_DECIBELS);
                // NaN and -inf from silent bins land on 0
                if scaled.is_finite() {
                    scaled.clamp(0.0, 255.0) as u8
                } else if scaled > 0.0 {
                    255
                } else {
                    0
                }
            })
            .collect()
    }
}

/// Mean of the bins covering `[min_hz, max_hz)`, normalized to `0..=1`.
pub fn frequency_average(bins: &[u8], sample_rate: u32, min_hz: f32, max_hz: f32) -> f32 {
    let start = frequency_to_index(min_hz, sample_rate, bins.len());
    let end = frequency_to_index(max_hz, sample_rate, bins.len());
    if end <= start {
        return 0.0;
    }
    let sum: f32 = bins[start..end].iter().map(|&b| b as f32 / 255.0).sum();
    sum / (end - start) as f32
}

fn frequency_to_index(frequency: f32, sample_rate: u32, bin_count: usize) -> usize {
    let nyquist = sample_rate as f32 / 2.0;
    let index = (frequency / nyquist * bin_count as f32).round();
    index.clamp(0.0, bin_count as f32) as usize
}

fn blackman_window(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_silence_is_all_zero() {
        let mut analyser = FrequencyAnalyser::new(512, 16000, 0.0);
        analyser.push(&vec![0.0; 512]);
        let bins = analyser.byte_frequency_data();
        assert_eq!(bins.len(), 256);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_peaks_in_its_bin() {
        let mut analyser = FrequencyAnalyser::new(512, 16000, 0.0);
        analyser.push(&tone(1000.0, 16000, 512, 0.8));
        let bins = analyser.byte_frequency_data();
        // 1000 Hz at 31.25 Hz per bin
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert!((31..=33).contains(&peak), "peak at bin {}", peak);
    }

    #[test]
    fn test_frequency_average_range() {
        let mut bins = vec![0u8; 256];
        // 85..255 Hz at 16 kHz covers bins 3..8
        for b in &mut bins[3..8] {
            *b = 255;
        }
        let avg = frequency_average(&bins, 16000, 85.0, 255.0);
        assert!((avg - 1.0).abs() < 1e-6);
        assert_eq!(frequency_average(&bins, 16000, 1000.0, 2000.0), 0.0);
        assert_eq!(frequency_average(&bins, 16000, 100.0, 100.0), 0.0);
    }

    #[test]
    fn test_low_tone_raises_capture_band() {
        let mut analyser = FrequencyAnalyser::new(512, 16000, 0.0);
        analyser.push(&tone(150.0, 16000, 512, 0.9));
        let bins = analyser.byte_frequency_data();
        let voiced = frequency_average(&bins, 16000, 85.0, 255.0);
        assert!(voiced > 0.5, "voiced band average {}", voiced);
    }

    #[test]
    fn test_push_keeps_latest_window() {
        let mut analyser = FrequencyAnalyser::new(8, 16000, 0.0);
        analyser.push(&[1.0; 20]);
        assert_eq!(analyser.history.snapshot(), vec![1.0; 8]);
    }
}
