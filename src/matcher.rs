//! Time-offset coincidence matching.
//!
//! Every query landmark that also occurs in an indexed track votes for the
//! offset `t_track - t_query`. A real match concentrates its votes in one
//! histogram bin because anchor-to-anchor delays are constant up to frame
//! quantization; chance collisions scatter. The peak bin gives both the
//! alignment and the score.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::fingerprint::Landmark;
use crate::index::{MemoryIndex, TrackHandle};

/// Caller-side pruning knobs. The matcher itself never decides "found"; it
/// returns a ranked list and leaves thresholds to the caller.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Drop candidates scoring below this before ranking.
    pub min_score: f32,
    /// Stop admitting new candidate tracks once this many are in play;
    /// already-admitted candidates keep accumulating votes.
    pub max_candidates_scanned: Option<usize>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_candidates_scanned: None,
        }
    }
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub track_id: String,
    /// `aligned / query_landmark_count`, always in `[0, 1]`.
    pub score: f32,
    /// Implied start of the query within the track, in STFT frames. Negative
    /// when the query appears to begin before the track does.
    pub offset_frames: i64,
    /// Votes in the winning histogram bin.
    pub aligned: u32,
}

/// Score the query landmarks against the index and return the top `k`.
pub fn match_landmarks(
    index: &MemoryIndex,
    query: &[Landmark],
    k: usize,
    config: &EngineConfig,
    opts: &MatchOptions,
) -> Vec<MatchCandidate> {
    if query.is_empty() || k == 0 {
        return Vec::new();
    }

    let q = query.len() as u32;
    let cap = config.max_postings_per_hash_query;

    let mut histograms: HashMap<TrackHandle, HashMap<i64, u32>> = HashMap::new();
    let mut seen: HashSet<(TrackHandle, i64)> = HashSet::new();

    for lm in query {
        let postings = index.lookup_capped(lm.hash, cap);
        if postings.is_empty() {
            continue;
        }
        // One vote per query landmark per (track, offset) bin, so colliding
        // duplicate postings cannot push a score past 1.
        seen.clear();
        for posting in postings {
            let delta = posting.anchor_time as i64 - lm.anchor_time as i64;
            if !seen.insert((posting.track, delta)) {
                continue;
            }
            if !histograms.contains_key(&posting.track) {
                if let Some(max) = opts.max_candidates_scanned {
                    if histograms.len() >= max {
                        continue;
                    }
                }
            }
            *histograms
                .entry(posting.track)
                .or_default()
                .entry(delta)
                .or_insert(0) += 1;
        }
    }

    let mut candidates = Vec::with_capacity(histograms.len());
    for (handle, histogram) in histograms {
        let mut best: Option<(i64, u32)> = None;
        for (delta, count) in histogram {
            best = match best {
                None => Some((delta, count)),
                Some((_, bc)) if count > bc => Some((delta, count)),
                Some((bd, bc)) if count == bc && delta < bd => Some((delta, count)),
                other => other,
            };
        }
        let Some((offset_frames, aligned)) = best else {
            continue;
        };
        // The track may have been forgotten between lookup and now; skip it.
        let Some(track) = index.track_by_handle(handle) else {
            continue;
        };

        let score = aligned as f32 / q as f32;
        if score < opts.min_score {
            continue;
        }
        candidates.push(MatchCandidate {
            track_id: track.track_id,
            score,
            offset_frames,
            aligned,
        });
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.aligned.cmp(&a.aligned))
            .then(a.track_id.cmp(&b.track_id))
    });
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Track;

    fn track(id: &str) -> Track {
        Track {
            track_id: id.to_string(),
            title: id.to_string(),
            artist: String::new(),
            path: String::new(),
            duration_s: 30.0,
            num_peaks: 0,
            num_hashes: 0,
        }
    }

    fn landmarks(hashes: &[(u32, u32)]) -> Vec<Landmark> {
        hashes
            .iter()
            .map(|&(hash, anchor_time)| Landmark { hash, anchor_time })
            .collect()
    }

    /// Query landmarks shifted by `shift` frames into the track.
    fn shifted(query: &[Landmark], shift: u32) -> Vec<Landmark> {
        query
            .iter()
            .map(|lm| Landmark {
                hash: lm.hash,
                anchor_time: lm.anchor_time + shift,
            })
            .collect()
    }

    #[test]
    fn aligned_subclip_scores_one_with_its_offset() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        let query = landmarks(&[(1, 0), (2, 3), (3, 9), (4, 14)]);
        index.add_track(track("a"), &shifted(&query, 120)).unwrap();

        let matches = match_landmarks(&index, &query, 5, &config, &MatchOptions::default());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].track_id, "a");
        assert_eq!(matches[0].offset_frames, 120);
        assert!((matches[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        index
            .add_track(track("a"), &landmarks(&[(1, 0)]))
            .unwrap();
        assert!(match_landmarks(&index, &[], 5, &config, &MatchOptions::default()).is_empty());
    }

    #[test]
    fn scattered_hits_score_low() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        // Same hashes, but offsets disagree frame by frame.
        index
            .add_track(
                track("a"),
                &landmarks(&[(1, 10), (2, 40), (3, 90), (4, 160)]),
            )
            .unwrap();
        let query = landmarks(&[(1, 0), (2, 3), (3, 9), (4, 14)]);

        let matches = match_landmarks(&index, &query, 5, &config, &MatchOptions::default());
        assert_eq!(matches.len(), 1);
        assert!((matches[0].score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn colliding_postings_cannot_exceed_score_one() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        // The track emits the same landmark twice at the same anchor time;
        // one query landmark must still contribute a single vote.
        index
            .add_track(track("a"), &landmarks(&[(7, 5), (7, 5)]))
            .unwrap();
        let query = landmarks(&[(7, 0)]);

        let matches = match_landmarks(&index, &query, 1, &config, &MatchOptions::default());
        assert_eq!(matches.len(), 1);
        assert!(matches[0].score <= 1.0);
        assert!((matches[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_smaller_track_id() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        let fingerprint = landmarks(&[(1, 0), (2, 5), (3, 11)]);
        index.add_track(track("b"), &fingerprint).unwrap();
        index.add_track(track("a"), &fingerprint).unwrap();

        let matches = match_landmarks(&index, &fingerprint, 2, &config, &MatchOptions::default());
        assert_eq!(matches.len(), 2);
        assert!((matches[0].score - matches[1].score).abs() < 1e-6);
        assert_eq!(matches[0].track_id, "a");
        assert_eq!(matches[1].track_id, "b");
    }

    #[test]
    fn min_score_prunes_candidates() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        index
            .add_track(track("strong"), &landmarks(&[(1, 10), (2, 13), (3, 19)]))
            .unwrap();
        index.add_track(track("weak"), &landmarks(&[(1, 400)])).unwrap();
        let query = landmarks(&[(1, 0), (2, 3), (3, 9)]);

        let opts = MatchOptions {
            min_score: 0.5,
            ..MatchOptions::default()
        };
        let matches = match_landmarks(&index, &query, 5, &config, &opts);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].track_id, "strong");
    }

    #[test]
    fn hot_hash_cap_bounds_postings_consulted() {
        let config = EngineConfig {
            max_postings_per_hash_query: 8,
            ..EngineConfig::default()
        };
        let index = MemoryIndex::new();
        // 50 tracks all sharing one hash; the cap keeps the scan bounded.
        for i in 0..50 {
            index
                .add_track(track(&format!("t{i:02}")), &landmarks(&[(0xBEEF, 0)]))
                .unwrap();
        }
        let query = landmarks(&[(0xBEEF, 0)]);
        let matches = match_landmarks(&index, &query, 50, &config, &MatchOptions::default());
        assert_eq!(matches.len(), 8);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let config = EngineConfig::default();
        let index = MemoryIndex::new();
        let fingerprint: Vec<Landmark> = (0..200)
            .map(|i| Landmark {
                hash: i % 40,
                anchor_time: i,
            })
            .collect();
        index.add_track(track("a"), &fingerprint).unwrap();

        let query: Vec<Landmark> = (0..60)
            .map(|i| Landmark {
                hash: i % 40,
                anchor_time: i,
            })
            .collect();
        for candidate in match_landmarks(&index, &query, 10, &config, &MatchOptions::default()) {
            assert!((0.0..=1.0).contains(&candidate.score));
        }
    }
}
