//! Engine configuration.
//!
//! One immutable record covers both the indexing and the query path. The DSP
//! fields (`sample_rate` through `dt_max`) determine the hashes themselves:
//! indexing and querying with different values silently destroys recall, so
//! an index built under one configuration must be queried under the same one.

use serde::Deserialize;

/// Fingerprinting and matching parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Canonical sample rate; input audio is resampled to this before the STFT.
    pub sample_rate: u32,

    /// STFT window length in samples.
    pub n_fft: usize,

    /// STFT hop in samples.
    pub hop: usize,

    /// Peak neighborhood radius, in bins, applied on both the time and the
    /// frequency axis.
    pub peak_radius: usize,

    /// Minimum raw spectral magnitude for a bin to qualify as a peak. The
    /// comparison happens on the `ln(1 + x)` compressed scale.
    pub min_amplitude: f32,

    /// Maximum number of later peaks each anchor peak is paired with.
    pub fan_out: usize,

    /// Maximum anchor-to-target distance of a pair, in STFT frames.
    pub dt_max: u32,

    /// Upper bound on postings consulted per hash during matching. Guards
    /// query latency against degenerate hashes shared by very many tracks.
    pub max_postings_per_hash_query: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 11_025,
            n_fft: 2048,
            hop: 512,
            peak_radius: 20,
            min_amplitude: 10.0,
            fan_out: 5,
            dt_max: 200,
            max_postings_per_hash_query: 5000,
        }
    }
}

impl EngineConfig {
    /// Number of frequency bins in the magnitude spectrogram.
    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Duration of one STFT hop in seconds.
    pub fn frame_period_s(&self) -> f64 {
        self.hop as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = EngineConfig::default();
        assert_eq!(config.bins(), 1025);
        assert!(config.dt_max <= 0x3FF);
        assert!((config.frame_period_s() - 512.0 / 11_025.0).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("peak_radius = 10").unwrap();
        assert_eq!(config.peak_radius, 10);
        assert_eq!(config.sample_rate, 11_025);
        assert_eq!(config.fan_out, 5);
    }
}
