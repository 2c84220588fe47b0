//! PCM conditioning and spectral analysis.
//!
//! Takes interleaved PCM at an arbitrary rate and produces the magnitude
//! spectrogram every later stage works on: mono mix, band-limited resample to
//! the canonical rate, peak normalization, then a Hann-windowed STFT.
//!
//! The whole chain is deterministic: the same bytes produce a bit-identical
//! spectrogram, which is what keeps index-time and query-time hashes in
//! agreement.

use std::f32::consts::PI;

use rayon::prelude::*;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, WindowFunction};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::EngineConfig;

/// Dense magnitude spectrogram, frame-major.
///
/// `magnitude(f, t)` is non-negative raw STFT magnitude; dynamic-range
/// compression is left to the peak extractor so the stored values stay
/// directly comparable to signal amplitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    bins: usize,
    frames: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    fn empty(bins: usize) -> Self {
        Self {
            bins,
            frames: 0,
            data: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_magnitudes(bins: usize, frames: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), bins * frames);
        Self { bins, frames, data }
    }

    /// Number of frequency bins (`n_fft / 2 + 1`).
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Number of time frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Magnitude at frequency bin `f`, time frame `t`.
    pub fn magnitude(&self, f: usize, t: usize) -> f32 {
        self.data[t * self.bins + f]
    }

    pub(crate) fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Turn interleaved PCM into a magnitude spectrogram.
///
/// Empty input, silent input and input shorter than one STFT window all come
/// back as a spectrogram with zero frames; downstream stages treat that as
/// "no fingerprint" rather than an error.
pub fn to_spectrogram(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    config: &EngineConfig,
) -> Spectrogram {
    let bins = config.bins();
    if samples.is_empty() || channels == 0 || source_rate == 0 || config.hop == 0 {
        return Spectrogram::empty(bins);
    }

    let mono = mix_to_mono(samples, channels);
    let Some(mut mono) = resample(&mono, source_rate, config.sample_rate) else {
        return Spectrogram::empty(bins);
    };

    let peak = mono.iter().map(|&s| s.abs()).fold(0.0f32, f32::max);
    if peak == 0.0 {
        return Spectrogram::empty(bins);
    }
    // Tolerate integer-scaled or clipped input by pulling the peak back to 1.0.
    if peak > 1.0 {
        let gain = 1.0 / peak;
        for sample in &mut mono {
            *sample *= gain;
        }
    }

    if mono.len() < config.n_fft {
        return Spectrogram::empty(bins);
    }

    stft(&mono, config)
}

fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Band-limited sinc resampling in fixed-size chunks; the final partial chunk
/// is zero-padded through the same filter.
fn resample(input: &[f32], source_rate: u32, target_rate: u32) -> Option<Vec<f32>> {
    if source_rate == target_rate {
        return Some(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: rubato::SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let chunk_size = 1024;
    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        2.0,
        params,
        chunk_size,
        1,
    )
    .ok()?;

    let mut output = Vec::new();
    let mut position = 0;

    while position + chunk_size <= input.len() {
        let chunk = vec![input[position..position + chunk_size].to_vec()];
        let result = resampler.process(&chunk, None).ok()?;
        output.extend_from_slice(&result[0]);
        position += chunk_size;
    }

    let remaining = input.len() - position;
    if remaining > 0 {
        let mut padded = vec![0.0; chunk_size];
        padded[..remaining].copy_from_slice(&input[position..]);
        let result = resampler.process(&[padded], None).ok()?;
        output.extend_from_slice(&result[0]);
    }

    Some(output)
}

fn stft(samples: &[f32], config: &EngineConfig) -> Spectrogram {
    let n_fft = config.n_fft;
    let hop = config.hop;
    let bins = config.bins();
    let frames = (samples.len() - n_fft) / hop + 1;

    let window = hann_window(n_fft);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let data: Vec<f32> = (0..frames)
        .into_par_iter()
        .flat_map_iter(|t| {
            let start = t * hop;
            let mut buffer: Vec<Complex<f32>> = samples[start..start + n_fft]
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex { re: s * w, im: 0.0 })
                .collect();
            fft.process(&mut buffer);

            buffer
                .into_iter()
                .take(bins)
                .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                .collect::<Vec<f32>>()
        })
        .collect();

    Spectrogram {
        bins,
        frames,
        data,
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let len = (seconds * sample_rate as f32) as usize;
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn sine_energy_lands_in_expected_bin() {
        let config = EngineConfig::default();
        let samples = sine(1000.0, 2.0, config.sample_rate);
        let spec = to_spectrogram(&samples, 1, config.sample_rate, &config);

        assert!(spec.frames() > 0);
        let expected_bin =
            (1000.0 * config.n_fft as f32 / config.sample_rate as f32).round() as usize;
        let t = spec.frames() / 2;
        let loudest = (0..spec.bins())
            .max_by(|&a, &b| {
                spec.magnitude(a, t)
                    .partial_cmp(&spec.magnitude(b, t))
                    .unwrap()
            })
            .unwrap();
        assert!(
            loudest.abs_diff(expected_bin) <= 1,
            "loudest bin {loudest}, expected {expected_bin}"
        );
    }

    #[test]
    fn short_and_silent_input_yield_zero_frames() {
        let config = EngineConfig::default();

        let spec = to_spectrogram(&[], 1, config.sample_rate, &config);
        assert_eq!(spec.frames(), 0);

        let spec = to_spectrogram(&[0.1; 100], 1, config.sample_rate, &config);
        assert_eq!(spec.frames(), 0);

        let silence = vec![0.0f32; config.sample_rate as usize];
        let spec = to_spectrogram(&silence, 1, config.sample_rate, &config);
        assert_eq!(spec.frames(), 0);
    }

    #[test]
    fn frame_count_matches_hop_arithmetic() {
        let config = EngineConfig::default();
        let samples = sine(500.0, 1.0, config.sample_rate);
        let spec = to_spectrogram(&samples, 1, config.sample_rate, &config);
        let expected = (samples.len() - config.n_fft) / config.hop + 1;
        assert_eq!(spec.frames(), expected);
        assert_eq!(spec.bins(), config.n_fft / 2 + 1);
    }

    #[test]
    fn stereo_mix_averages_channels() {
        let config = EngineConfig::default();
        let mono = sine(440.0, 1.0, config.sample_rate);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();

        let from_mono = to_spectrogram(&mono, 1, config.sample_rate, &config);
        let from_stereo = to_spectrogram(&stereo, 2, config.sample_rate, &config);
        assert_eq!(from_mono, from_stereo);
    }

    #[test]
    fn spectrogram_is_deterministic() {
        let config = EngineConfig::default();
        let samples = sine(880.0, 1.5, config.sample_rate);
        let a = to_spectrogram(&samples, 1, config.sample_rate, &config);
        let b = to_spectrogram(&samples, 1, config.sample_rate, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn clipped_input_is_normalized() {
        let config = EngineConfig::default();
        let quiet = sine(700.0, 1.0, config.sample_rate);
        let loud: Vec<f32> = quiet.iter().map(|&s| s * 4.0).collect();

        let a = to_spectrogram(&quiet, 1, config.sample_rate, &config);
        let b = to_spectrogram(&loud, 1, config.sample_rate, &config);

        // Same shape, same dominant bin; gain must not move spectral peaks.
        assert_eq!(a.frames(), b.frames());
        let t = a.frames() / 2;
        let argmax = |s: &Spectrogram| {
            (0..s.bins())
                .max_by(|&x, &y| s.magnitude(x, t).partial_cmp(&s.magnitude(y, t)).unwrap())
                .unwrap()
        };
        assert_eq!(argmax(&a), argmax(&b));
    }
}
