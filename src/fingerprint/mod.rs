//! Constellation extraction and combinatorial hashing.
//!
//! A spectrogram is reduced to its robust spectral peaks, and each peak is
//! paired with a handful of later peaks to form time-anchored landmark
//! hashes. The hashes are what the index stores and the matcher looks up.

mod hashing;
mod peaks;

pub use hashing::{generate_landmarks, pack_hash, unpack_hash};
pub use peaks::find_peaks;

/// 32-bit landmark hash: `(f1 & 0x3FF) << 20 | (f2 & 0x3FF) << 10 | dt`.
pub type LandmarkHash = u32;

/// A strict local maximum of the spectrogram.
///
/// `amplitude` is on the compressed (`ln(1 + x)`) magnitude scale. Peak lists
/// are ordered by time, then frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Time frame index.
    pub t: u32,
    /// Frequency bin index.
    pub f: u32,
    /// Compressed magnitude at `(f, t)`.
    pub amplitude: f32,
}

/// A landmark hash anchored at the time frame of its earlier peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Landmark {
    pub hash: LandmarkHash,
    /// Frame index of the anchor peak within the owning clip or track.
    pub anchor_time: u32,
}
