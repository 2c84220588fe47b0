//! Audio front end and fingerprint pipeline glue.
//!
//! Wires decoding, resampling, spectral analysis, peak extraction and
//! hashing together to produce the landmark set for one clip or track.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fingerprint::{find_peaks, generate_landmarks, Landmark};

pub mod decode;
mod frontend;

pub use frontend::{to_spectrogram, Spectrogram};

/// The landmark set of one decoded clip, plus the bookkeeping the index
/// records alongside it.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub landmarks: Vec<Landmark>,
    pub num_peaks: u64,
    pub duration_s: f64,
}

/// Run the end-to-end fingerprint pipeline on interleaved PCM.
///
/// Returns [`EngineError::EmptyFingerprint`] when the input is empty, silent
/// or shorter than one STFT window. A non-empty spectrogram that happens to
/// yield fewer than two peaks is not an error; it produces an empty landmark
/// list.
pub fn fingerprint_pcm(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    config: &EngineConfig,
) -> Result<Fingerprint> {
    let spectrogram = to_spectrogram(samples, channels, source_rate, config);
    if spectrogram.frames() == 0 {
        return Err(EngineError::EmptyFingerprint);
    }

    let peaks = find_peaks(&spectrogram, config);
    let landmarks = generate_landmarks(&peaks, config);
    let duration_s = (samples.len() / channels) as f64 / source_rate as f64;

    Ok(Fingerprint {
        landmarks,
        num_peaks: peaks.len() as u64,
        duration_s,
    })
}

/// Run the end-to-end fingerprint pipeline on raw audio bytes.
pub fn fingerprint_bytes(bytes: &[u8], config: &EngineConfig) -> Result<Fingerprint> {
    let decoded = decode::decode_bytes(bytes)?;
    fingerprint_pcm(
        &decoded.samples,
        decoded.channels,
        decoded.sample_rate,
        config,
    )
}
