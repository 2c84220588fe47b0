//! Combinatorial landmark hashing.
//!
//! Each anchor peak is paired with at most `fan_out` of the peaks that follow
//! it within `dt_max` frames. The pair is packed into a 32-bit hash of three
//! 10-bit fields; the pair is ordered, which is what encodes temporal
//! direction, so the fields are never sorted.

use crate::config::EngineConfig;
use crate::fingerprint::{Landmark, LandmarkHash, Peak};

/// Largest value a 10-bit hash field can carry.
const FIELD_MAX: u32 = 0x3FF;

/// Pack an ordered peak pair into a landmark hash.
///
/// Returns `None` when a frequency bin or the time delta does not fit its
/// 10-bit field; rejecting keeps distinct bins from aliasing onto each other.
pub fn pack_hash(f1: u32, f2: u32, dt: u32) -> Option<LandmarkHash> {
    if f1 > FIELD_MAX || f2 > FIELD_MAX || dt > FIELD_MAX {
        return None;
    }
    Some((f1 << 20) | (f2 << 10) | dt)
}

/// Split a landmark hash back into `(f1, f2, dt)`.
pub fn unpack_hash(hash: LandmarkHash) -> (u32, u32, u32) {
    ((hash >> 20) & FIELD_MAX, (hash >> 10) & FIELD_MAX, hash & FIELD_MAX)
}

/// Generate landmarks from a time-ordered peak list.
///
/// Duplicate `(hash, anchor_time)` entries are permitted; the matcher
/// tolerates them, so no deduplication happens here.
pub fn generate_landmarks(peaks: &[Peak], config: &EngineConfig) -> Vec<Landmark> {
    if peaks.len() < 2 || config.fan_out == 0 {
        return Vec::new();
    }

    let dt_limit = config.dt_max.min(FIELD_MAX);
    let mut landmarks = Vec::new();

    for (i, anchor) in peaks.iter().enumerate() {
        let mut paired = 0;
        for target in &peaks[i + 1..] {
            if paired >= config.fan_out {
                break;
            }
            let dt = target.t - anchor.t;
            if dt == 0 {
                continue;
            }
            if dt > dt_limit {
                break;
            }
            if let Some(hash) = pack_hash(anchor.f, target.f, dt) {
                landmarks.push(Landmark {
                    hash,
                    anchor_time: anchor.t,
                });
                paired += 1;
            }
        }
    }

    landmarks
}
