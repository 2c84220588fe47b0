//! Spectral peak extraction.
//!
//! A bin survives when it equals the maximum of its rectangular neighborhood
//! and clears the amplitude floor on the compressed scale. The neighborhood
//! maximum is computed with a separable sliding-window filter, one pass per
//! axis, so the whole extraction is linear in the spectrogram size.

use std::collections::VecDeque;

use crate::audio::Spectrogram;
use crate::config::EngineConfig;
use crate::fingerprint::Peak;

/// Extract spectral peaks in time-then-frequency order.
pub fn find_peaks(spectrogram: &Spectrogram, config: &EngineConfig) -> Vec<Peak> {
    let frames = spectrogram.frames();
    let bins = spectrogram.bins();
    if frames == 0 || bins == 0 {
        return Vec::new();
    }

    let floor = (1.0 + config.min_amplitude).ln();
    let compressed: Vec<f32> = spectrogram.data().iter().map(|&m| m.ln_1p()).collect();
    let radius = config.peak_radius;

    // Frequency axis first: rows are contiguous in the frame-major layout.
    let mut row_max = vec![0.0f32; compressed.len()];
    for t in 0..frames {
        let row = t * bins;
        sliding_max(&compressed[row..row + bins], radius, &mut row_max[row..row + bins]);
    }

    // Time axis second, over the row maxima.
    let mut local_max = vec![0.0f32; compressed.len()];
    for f in 0..bins {
        sliding_max_strided(&row_max, bins, f, frames, radius, &mut local_max);
    }

    let mut peaks = Vec::new();
    let mut visited = vec![false; compressed.len()];
    let mut stack = Vec::new();

    for t in 0..frames {
        for f in 0..bins {
            let i = t * bins + f;
            if visited[i] {
                continue;
            }
            let value = compressed[i];
            if value <= 0.0 || value < floor || value != local_max[i] {
                continue;
            }

            // First cell of an equal-magnitude plateau in scan order is the
            // lexicographically smallest (t, f); it wins, the rest of the
            // connected region is flooded so it emits nothing.
            peaks.push(Peak {
                t: t as u32,
                f: f as u32,
                amplitude: value,
            });

            visited[i] = true;
            stack.push((t, f));
            while let Some((ct, cf)) = stack.pop() {
                for (dt, df) in NEIGHBORS {
                    let Some(nt) = ct.checked_add_signed(dt) else {
                        continue;
                    };
                    let Some(nf) = cf.checked_add_signed(df) else {
                        continue;
                    };
                    if nt >= frames || nf >= bins {
                        continue;
                    }
                    let ni = nt * bins + nf;
                    if !visited[ni] && compressed[ni] == value && compressed[ni] == local_max[ni] {
                        visited[ni] = true;
                        stack.push((nt, nf));
                    }
                }
            }
        }
    }

    peaks
}

const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Windowed maximum over `input`, window `[i - radius, i + radius]` clipped to
/// the slice, via a monotonically decreasing index deque.
fn sliding_max(input: &[f32], radius: usize, out: &mut [f32]) {
    let n = input.len();
    let mut deque: VecDeque<usize> = VecDeque::new();
    let mut next = 0;

    for i in 0..n {
        let hi = (i + radius).min(n - 1);
        while next <= hi {
            while let Some(&back) = deque.back() {
                if input[back] <= input[next] {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back(next);
            next += 1;
        }
        while let Some(&front) = deque.front() {
            if front + radius < i {
                deque.pop_front();
            } else {
                break;
            }
        }
        if let Some(&front) = deque.front() {
            out[i] = input[front];
        }
    }
}

/// Same as [`sliding_max`] over the strided sequence
/// `input[offset], input[offset + stride], ..` of length `len`.
fn sliding_max_strided(
    input: &[f32],
    stride: usize,
    offset: usize,
    len: usize,
    radius: usize,
    out: &mut [f32],
) {
    let mut deque: VecDeque<usize> = VecDeque::new();
    let mut next = 0;

    for i in 0..len {
        let hi = (i + radius).min(len - 1);
        while next <= hi {
            while let Some(&back) = deque.back() {
                if input[offset + back * stride] <= input[offset + next * stride] {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back(next);
            next += 1;
        }
        while let Some(&front) = deque.front() {
            if front + radius < i {
                deque.pop_front();
            } else {
                break;
            }
        }
        if let Some(&front) = deque.front() {
            out[offset + i * stride] = input[offset + front * stride];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Spectrogram;

    fn small_config() -> EngineConfig {
        EngineConfig {
            peak_radius: 2,
            min_amplitude: 10.0,
            ..EngineConfig::default()
        }
    }

    fn grid(bins: usize, frames: usize, cells: &[(usize, usize, f32)]) -> Spectrogram {
        let mut data = vec![0.0f32; bins * frames];
        for &(t, f, raw) in cells {
            data[t * bins + f] = raw;
        }
        Spectrogram::from_magnitudes(bins, frames, data)
    }

    #[test]
    fn isolated_maximum_is_found() {
        let config = small_config();
        let spec = grid(16, 16, &[(7, 9, 50.0)]);
        let peaks = find_peaks(&spec, &config);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (7, 9));
        assert!((peaks[0].amplitude - 51.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn floor_excludes_weak_maxima() {
        let config = small_config();
        // 50.0 clears ln(1 + 10); 5.0 does not.
        let spec = grid(16, 16, &[(3, 3, 50.0), (12, 12, 5.0)]);
        let peaks = find_peaks(&spec, &config);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (3, 3));
    }

    #[test]
    fn nearby_weaker_cell_is_suppressed() {
        let config = small_config();
        let spec = grid(16, 16, &[(5, 5, 50.0), (5, 6, 40.0)]);
        let peaks = find_peaks(&spec, &config);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (5, 5));
    }

    #[test]
    fn distant_equal_maxima_both_survive() {
        let config = small_config();
        let spec = grid(16, 16, &[(2, 2, 50.0), (12, 12, 50.0)]);
        let peaks = find_peaks(&spec, &config);
        assert_eq!(peaks.len(), 2);
    }

    #[test]
    fn plateau_keeps_smallest_time_then_frequency() {
        let config = small_config();
        let spec = grid(16, 16, &[(6, 7, 50.0), (6, 8, 50.0), (7, 7, 50.0)]);
        let peaks = find_peaks(&spec, &config);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (6, 7));
    }

    #[test]
    fn border_cell_can_be_a_peak() {
        let config = small_config();
        let spec = grid(16, 16, &[(0, 0, 50.0)]);
        let peaks = find_peaks(&spec, &config);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].t, peaks[0].f), (0, 0));
    }

    #[test]
    fn all_zero_spectrogram_has_no_peaks() {
        let config = small_config();
        let spec = grid(16, 16, &[]);
        assert!(find_peaks(&spec, &config).is_empty());
    }

    #[test]
    fn output_is_time_then_frequency_ordered() {
        let config = small_config();
        let spec = grid(
            32,
            32,
            &[(20, 3, 50.0), (4, 25, 50.0), (4, 2, 50.0), (11, 11, 50.0)],
        );
        let peaks = find_peaks(&spec, &config);
        let order: Vec<(u32, u32)> = peaks.iter().map(|p| (p.t, p.f)).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(peaks.len(), 4);
    }
}
